// Ball launcher: shooter motor plus ball-release servo
//
// The launch action is opaque to the motion engine; what it guarantees to
// the sequencer is the same rest-on-exit contract as the drive primitives.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config;
use crate::hardware::{DriveMotor, Result, Servo};
use crate::motion::clock::Clock;
use crate::motion::engine::StopFlag;

/// Terminal state of a launch action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Completed,
    Cancelled,
}

pub struct Launcher {
    shooter: Box<dyn DriveMotor>,
    ball_release: Box<dyn Servo>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
}

impl Launcher {
    pub fn new(
        shooter: Box<dyn DriveMotor>,
        ball_release: Box<dyn Servo>,
        clock: Arc<dyn Clock>,
        stop: StopFlag,
    ) -> Self {
        Self {
            shooter,
            ball_release,
            clock,
            stop,
        }
    }

    /// Launch `count` balls, blocking until done or a stop is raised.
    /// The shooter is powered down and the release closed on every exit path.
    pub fn launch(&mut self, count: u32) -> Result<LaunchOutcome> {
        let outcome = self.run_launch(count);
        let rest = self.rest();
        let outcome = outcome?;
        rest?;
        info!("Launch finished: {:?}", outcome);
        Ok(outcome)
    }

    fn run_launch(&mut self, count: u32) -> Result<LaunchOutcome> {
        info!("Launching {} balls", count);

        self.shooter.set_power(config::SHOOTER_POWER)?;
        if !self.dwell(config::SHOOTER_SPINUP) {
            return Ok(LaunchOutcome::Cancelled);
        }

        for shot in 0..count {
            if self.stop.is_raised() {
                return Ok(LaunchOutcome::Cancelled);
            }

            self.ball_release.set_position(config::BALL_RELEASE_OPEN)?;
            if !self.dwell(config::FEED_DWELL) {
                return Ok(LaunchOutcome::Cancelled);
            }
            self.ball_release.set_position(config::BALL_RELEASE_CLOSED)?;

            if shot + 1 < count && !self.dwell(config::RELOAD_DWELL) {
                return Ok(LaunchOutcome::Cancelled);
            }
        }

        Ok(LaunchOutcome::Completed)
    }

    /// Sleep in poll-period chunks so a stop request is observed promptly.
    /// Returns false if the stop flag was raised during the dwell.
    fn dwell(&self, duration: Duration) -> bool {
        let period = Duration::from_millis(1000 / config::LOOP_HZ);
        let started = self.clock.now();
        loop {
            if self.stop.is_raised() {
                warn!("Stop requested during launch dwell");
                return false;
            }
            let elapsed = self.clock.now() - started;
            if elapsed >= duration {
                return true;
            }
            self.clock.sleep(period.min(duration - elapsed));
        }
    }

    fn rest(&mut self) -> Result<()> {
        let shooter = self.shooter.set_power(0.0);
        let release = self.ball_release.set_position(config::BALL_RELEASE_CLOSED);
        shooter.and(release)
    }
}
