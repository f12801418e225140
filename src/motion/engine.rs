// Blocking motion primitives: encoder-fed drives and gyro-fed turns
//
// Each primitive IS the blocking call: it arms the hardware, polls at the
// control cadence, and leaves both side powers at zero on every exit path -
// arrival, timeout, cancellation or fault.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config;
use crate::hardware::{DriveMotor, HardwareError, HeadingSensor, Result, RunMode};

use super::clock::Clock;
use super::heading::{TurnDirection, signed_delta};

/// Cooperative stop request shared with the host runtime.
///
/// Every poll loop observes it each iteration; once raised, the active
/// primitive zeroes its outputs and unwinds.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal state of a drive primitive.
///
/// A timeout is the designed safety bound, not an error: the call returns
/// normally with the robot at rest wherever it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    Arrived,
    TimedOut,
    Cancelled,
}

/// Terminal state of a turn primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// The closed-loop motion engine over two drivetrain sides and the gyro
pub struct MotionEngine {
    left: Box<dyn DriveMotor>,
    right: Box<dyn DriveMotor>,
    gyro: Box<dyn HeadingSensor>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
}

impl MotionEngine {
    pub fn new(
        left: Box<dyn DriveMotor>,
        right: Box<dyn DriveMotor>,
        gyro: Box<dyn HeadingSensor>,
        clock: Arc<dyn Clock>,
        stop: StopFlag,
    ) -> Self {
        Self {
            left,
            right,
            gyro,
            clock,
            stop,
        }
    }

    fn poll_period() -> Duration {
        Duration::from_millis(1000 / config::LOOP_HZ)
    }

    /// Drive each side by a signed distance in inches, blocking until both
    /// sides reach their targets, the timeout elapses, or a stop is raised.
    ///
    /// `speed` is a magnitude; the sign of each side's power comes only from
    /// its delta. A zero delta on one side is legal.
    pub fn drive_distance(
        &mut self,
        speed: f32,
        left_in: f32,
        right_in: f32,
        timeout: Duration,
    ) -> Result<DriveOutcome> {
        let outcome = self.run_drive(speed, left_in, right_in, timeout);
        let rest = self.rest();
        let outcome = outcome?;
        rest?;
        info!("Drive finished: {:?}", outcome);
        Ok(outcome)
    }

    fn run_drive(
        &mut self,
        speed: f32,
        left_in: f32,
        right_in: f32,
        timeout: Duration,
    ) -> Result<DriveOutcome> {
        let speed = speed.abs().min(1.0);
        let left_target = self.left.position()? + ticks(left_in);
        let right_target = self.right.position()? + ticks(right_in);

        info!(
            "Driving {:.1}/{:.1} in at {:.2} power, {:.1}s budget",
            left_in,
            right_in,
            speed,
            timeout.as_secs_f32()
        );
        debug!("Targets: left={}, right={}", left_target, right_target);

        self.left.set_target(left_target)?;
        self.right.set_target(right_target)?;
        self.left.set_mode(RunMode::ToPosition)?;
        self.right.set_mode(RunMode::ToPosition)?;
        self.left.set_power(side_power(speed, left_in))?;
        self.right.set_power(side_power(speed, right_in))?;

        let period = Self::poll_period();
        let started = self.clock.now();
        let mut left_busy = true;
        let mut right_busy = true;

        loop {
            if self.stop.is_raised() {
                return Ok(DriveOutcome::Cancelled);
            }

            // A transient read glitch keeps the last known state for this cycle
            match self.left.is_busy() {
                Ok(busy) => left_busy = busy,
                Err(e) => warn!("Left encoder read failed, keeping last state: {}", e),
            }
            match self.right.is_busy() {
                Ok(busy) => right_busy = busy,
                Err(e) => warn!("Right encoder read failed, keeping last state: {}", e),
            }

            if !(left_busy && right_busy) {
                return Ok(DriveOutcome::Arrived);
            }
            if self.clock.now() - started >= timeout {
                return Ok(DriveOutcome::TimedOut);
            }
            self.clock.sleep(period);
        }
    }

    /// Rotate the chassis in place by `degrees` in the given direction,
    /// using heading feedback, bounded by the internal turn timeout.
    ///
    /// Fails fast if the gyro does not report calibrated inside its ready
    /// window; the engine never turns blind.
    pub fn turn_by_angle(&mut self, direction: TurnDirection, degrees: f32) -> Result<TurnOutcome> {
        let outcome = self.run_turn(direction, degrees);
        let rest = self.rest();
        let outcome = outcome?;
        rest?;
        info!("Turn finished: {:?}", outcome);
        Ok(outcome)
    }

    fn run_turn(&mut self, direction: TurnDirection, degrees: f32) -> Result<TurnOutcome> {
        self.wait_gyro_ready()?;
        let degrees = degrees.abs();

        info!("Turning {:?} {:.1} deg", direction, degrees);

        let power = config::TURN_SPEED * direction.sign();
        self.left.set_power(power)?;
        self.right.set_power(-power)?;

        let period = Self::poll_period();
        let started = self.clock.now();
        let mut previous: Option<f32> = None;
        let mut progress = 0.0f32;

        loop {
            if self.stop.is_raised() {
                return Ok(TurnOutcome::Cancelled);
            }

            match self.gyro.heading() {
                Ok(heading) => {
                    if let Some(prev) = previous {
                        progress += signed_delta(prev, heading) * direction.sign();
                    }
                    previous = Some(heading);
                }
                // Persistent glitches fall through to the timeout path
                Err(e) => warn!("Heading read failed, holding last value: {}", e),
            }

            if progress >= degrees - config::TURN_TOLERANCE_DEG {
                return Ok(TurnOutcome::Completed);
            }
            if self.clock.now() - started >= config::TURN_TIMEOUT {
                return Ok(TurnOutcome::TimedOut);
            }
            self.clock.sleep(period);
        }
    }

    /// Block until the gyro reports calibrated, bounded by the ready window
    fn wait_gyro_ready(&mut self) -> Result<()> {
        let started = self.clock.now();
        while !self.gyro.is_calibrated()? {
            if self.clock.now() - started >= config::GYRO_READY_TIMEOUT {
                return Err(HardwareError::GyroNotReady);
            }
            self.clock.sleep(Self::poll_period());
        }
        Ok(())
    }

    /// Zero both side powers and return the motors to a passive mode.
    /// Runs on every exit path; the right side is stopped even if the left
    /// side fails.
    fn rest(&mut self) -> Result<()> {
        let left = rest_motor(self.left.as_mut());
        let right = rest_motor(self.right.as_mut());
        left.and(right)
    }
}

fn rest_motor(motor: &mut dyn DriveMotor) -> Result<()> {
    motor.set_power(0.0)?;
    motor.set_mode(RunMode::UsingEncoder)
}

/// Convert a requested distance to a tick delta
fn ticks(inches: f32) -> i32 {
    (inches * config::COUNTS_PER_INCH).round() as i32
}

/// Power for one side: magnitude from the clamped speed, sign from the delta
fn side_power(speed: f32, delta_in: f32) -> f32 {
    if delta_in == 0.0 {
        0.0
    } else {
        speed.copysign(delta_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{FakeClock, SIM_LEFT, SIM_RIGHT, SimRig, StopAfter};

    const DRIVE_BUDGET: Duration = Duration::from_secs(5);

    fn engine_on(sim: &SimRig, clock: Arc<dyn Clock>, stop: StopFlag) -> MotionEngine {
        let rig = sim.rig();
        MotionEngine::new(rig.left, rig.right, rig.gyro, clock, stop)
    }

    fn setup() -> (SimRig, FakeClock, MotionEngine) {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let engine = engine_on(&sim, Arc::new(clock.clone()), StopFlag::new());
        (sim, clock, engine)
    }

    fn assert_at_rest(sim: &SimRig) {
        assert_eq!(sim.powers(), [0.0, 0.0, 0.0], "powers not zeroed on exit");
    }

    #[test]
    fn test_drive_arrives_before_timeout() {
        let (sim, _clock, mut engine) = setup();

        let outcome = engine
            .drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET)
            .unwrap();

        assert_eq!(outcome, DriveOutcome::Arrived);
        assert_eq!(sim.position(SIM_LEFT), ticks(20.0));
        assert_eq!(sim.position(SIM_RIGHT), ticks(20.0));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_drive_timeout_is_bounded() {
        let (sim, clock, mut engine) = setup();
        sim.set_stalled(SIM_LEFT, true);
        sim.set_stalled(SIM_RIGHT, true);

        let before = clock.now();
        let outcome = engine
            .drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET)
            .unwrap();
        let elapsed = clock.now() - before;

        assert_eq!(outcome, DriveOutcome::TimedOut);
        // Returns no later than the budget plus one poll cycle
        assert!(elapsed >= DRIVE_BUDGET);
        assert!(elapsed <= DRIVE_BUDGET + Duration::from_millis(1000 / config::LOOP_HZ));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_drive_sign_symmetry() {
        let (sim, _clock, mut engine) = setup();
        engine
            .drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET)
            .unwrap();
        let forward_left = sim.power_log(SIM_LEFT);
        let forward_right = sim.power_log(SIM_RIGHT);

        let (sim, _clock, mut engine) = setup();
        engine
            .drive_distance(0.5, -20.0, -20.0, DRIVE_BUDGET)
            .unwrap();
        let reverse_left = sim.power_log(SIM_LEFT);
        let reverse_right = sim.power_log(SIM_RIGHT);

        // Same magnitudes, opposite signs, on both sides
        assert_eq!(forward_left.len(), reverse_left.len());
        for (f, r) in forward_left.iter().zip(&reverse_left) {
            assert_eq!(*f, -*r);
        }
        for (f, r) in forward_right.iter().zip(&reverse_right) {
            assert_eq!(*f, -*r);
        }
    }

    #[test]
    fn test_drive_zero_delta_side_is_legal() {
        let (sim, _clock, mut engine) = setup();

        let outcome = engine
            .drive_distance(0.5, 0.0, 12.0, DRIVE_BUDGET)
            .unwrap();

        // The zero side is armed at its current position and commands no power
        assert_eq!(outcome, DriveOutcome::Arrived);
        assert!(sim.power_log(SIM_LEFT).iter().all(|p| *p == 0.0));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_drive_cancelled_mid_move_leaves_rest() {
        let fake = FakeClock::new();
        let stop = StopFlag::new();
        let clock = Arc::new(StopAfter::new(
            fake.clone(),
            stop.clone(),
            Duration::from_millis(500),
        ));
        let sim = SimRig::new(clock.clone());
        sim.set_stalled(SIM_LEFT, true);
        sim.set_stalled(SIM_RIGHT, true);
        let mut engine = engine_on(&sim, clock, stop);

        let outcome = engine
            .drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET)
            .unwrap();

        assert_eq!(outcome, DriveOutcome::Cancelled);
        assert!(fake.now() < Duration::from_secs(1));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_drive_arm_fault_still_rests() {
        let (sim, _clock, mut engine) = setup();
        sim.inject_arm_fault(SIM_LEFT);

        let result = engine.drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET);

        assert!(result.is_err());
        assert_at_rest(&sim);
    }

    #[test]
    fn test_drive_busy_glitches_are_absorbed() {
        let (sim, _clock, mut engine) = setup();
        sim.inject_busy_glitches(SIM_LEFT, 3);

        let outcome = engine
            .drive_distance(0.5, 20.0, 20.0, DRIVE_BUDGET)
            .unwrap();

        assert_eq!(outcome, DriveOutcome::Arrived);
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_right_90() {
        let (sim, _clock, mut engine) = setup();

        let outcome = engine.turn_by_angle(TurnDirection::Right, 90.0).unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        let heading = sim.heading();
        assert!(
            heading >= 90.0 - config::TURN_TOLERANCE_DEG - 3.0 && heading <= 95.0,
            "heading {} not near 90",
            heading
        );
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_left_90() {
        let (sim, _clock, mut engine) = setup();

        let outcome = engine.turn_by_angle(TurnDirection::Left, 90.0).unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        let heading = sim.heading();
        assert!(
            (265.0..=272.5).contains(&heading),
            "heading {} not near 270",
            heading
        );
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_across_wraparound() {
        let (sim, _clock, mut engine) = setup();
        sim.set_heading(350.0);

        let outcome = engine.turn_by_angle(TurnDirection::Right, 20.0).unwrap();

        // 350 through the seam to ~8-10; progress must accumulate continuously
        assert_eq!(outcome, TurnOutcome::Completed);
        let heading = sim.heading();
        assert!(
            (5.0..=12.0).contains(&heading),
            "heading {} not near 10",
            heading
        );
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_timeout_is_bounded() {
        let (sim, clock, mut engine) = setup();
        sim.set_stalled(SIM_LEFT, true);
        sim.set_stalled(SIM_RIGHT, true);

        let before = clock.now();
        let outcome = engine.turn_by_angle(TurnDirection::Right, 90.0).unwrap();
        let elapsed = clock.now() - before;

        assert_eq!(outcome, TurnOutcome::TimedOut);
        assert!(elapsed >= config::TURN_TIMEOUT);
        assert!(elapsed <= config::TURN_TIMEOUT + Duration::from_millis(1000 / config::LOOP_HZ));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_fails_fast_when_gyro_not_ready() {
        let (sim, _clock, mut engine) = setup();
        sim.set_calibrated(false);
        let start_heading = sim.heading();

        let result = engine.turn_by_angle(TurnDirection::Right, 90.0);

        assert!(matches!(result, Err(HardwareError::GyroNotReady)));
        // Never turned blind
        assert_eq!(sim.heading(), start_heading);
        assert!(sim.power_log(SIM_LEFT).iter().all(|p| *p == 0.0));
        assert_at_rest(&sim);
    }

    #[test]
    fn test_turn_heading_glitches_are_absorbed() {
        let (sim, _clock, mut engine) = setup();
        sim.inject_heading_glitches(2);

        let outcome = engine.turn_by_angle(TurnDirection::Right, 90.0).unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_at_rest(&sim);
    }
}
