// Mission scripts and the step sequencer
//
// A mission is an ordered list of primitive calls executed strictly in
// sequence on one thread. Each primitive blocks until its own completion
// condition, so steps never overlap and the robot is at rest between them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config;
use crate::hardware::{HardwareError, Rig};
use crate::launcher::{LaunchOutcome, Launcher};
use crate::motion::clock::Clock;
use crate::motion::engine::{DriveOutcome, MotionEngine, StopFlag, TurnOutcome};
use crate::motion::heading::TurnDirection;
use crate::telemetry::{StepOutcome, StepStatus, TelemetrySink};

/// One unit of scripted work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissionStep {
    Drive {
        speed: f32,
        left_in: f32,
        right_in: f32,
        timeout_s: f32,
    },
    Turn {
        direction: TurnDirection,
        degrees: f32,
    },
    Launch {
        count: u32,
    },
}

impl MissionStep {
    fn describe(&self) -> String {
        match self {
            MissionStep::Drive {
                left_in, right_in, ..
            } => format!("drive {:.1}/{:.1} in", left_in, right_in),
            MissionStep::Turn { direction, degrees } => {
                format!("turn {:?} {:.1} deg", direction, degrees)
            }
            MissionStep::Launch { count } => format!("launch {}", count),
        }
    }
}

/// An ordered, append-only script for one autonomous run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub name: String,
    pub steps: Vec<MissionStep>,
}

impl Mission {
    pub const BUILTIN_NAMES: [&'static str; 2] = ["p1-shoot2-center", "p2-shoot2-center"];

    pub fn from_json(text: &str) -> Result<Self, MissionError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The field scripts shipped with the robot
    pub fn builtin(name: &str) -> Option<Self> {
        let drive = |left_in: f32, right_in: f32| MissionStep::Drive {
            speed: config::DRIVE_SPEED,
            left_in,
            right_in,
            timeout_s: 5.0,
        };

        match name {
            "p1-shoot2-center" => Some(Mission {
                name: name.to_string(),
                steps: vec![
                    drive(-22.0, -22.0),
                    MissionStep::Launch { count: 2 },
                    drive(-24.0, -24.0),
                    MissionStep::Turn {
                        direction: TurnDirection::Left,
                        degrees: 90.0,
                    },
                ],
            }),
            "p2-shoot2-center" => Some(Mission {
                name: name.to_string(),
                steps: vec![
                    drive(-20.0, -20.0),
                    MissionStep::Turn {
                        direction: TurnDirection::Left,
                        degrees: 90.0,
                    },
                    drive(-30.0, -30.0),
                    MissionStep::Turn {
                        direction: TurnDirection::Right,
                        degrees: 90.0,
                    },
                    MissionStep::Launch { count: 2 },
                    drive(-24.0, -24.0),
                ],
            }),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("Hardware fault during step {index}: {source}")]
    Hardware {
        index: usize,
        #[source]
        source: HardwareError,
    },

    #[error("Invalid mission script: {0}")]
    Script(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionOutcome {
    Completed,
    Cancelled,
}

/// Executes missions step by step over the motion engine and launcher
pub struct MissionRunner {
    engine: MotionEngine,
    launcher: Launcher,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
    telemetry: Option<Box<dyn TelemetrySink>>,
}

impl MissionRunner {
    pub fn new(rig: Rig, clock: Arc<dyn Clock>, stop: StopFlag) -> Self {
        let engine = MotionEngine::new(rig.left, rig.right, rig.gyro, clock.clone(), stop.clone());
        let launcher = Launcher::new(rig.shooter, rig.ball_release, clock.clone(), stop.clone());
        Self {
            engine,
            launcher,
            clock,
            stop,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Run every step in order. A timed-out step is a designed bound and the
    /// script continues; a hardware fault aborts the remainder with the
    /// robot at rest; a stop request ends the mission after the current step
    /// unwinds.
    pub fn run(&mut self, mission: &Mission) -> Result<MissionOutcome, MissionError> {
        info!(
            "Running mission '{}' ({} steps)",
            mission.name,
            mission.steps.len()
        );

        for (index, step) in mission.steps.iter().enumerate() {
            if self.stop.is_raised() {
                warn!("Stop requested, skipping remaining steps");
                return Ok(MissionOutcome::Cancelled);
            }

            let started = self.clock.now();
            let outcome = self
                .run_step(step)
                .map_err(|source| MissionError::Hardware { index, source })?;
            let elapsed = self.clock.now() - started;

            self.publish(StepStatus {
                index,
                step: step.describe(),
                outcome,
                elapsed_ms: elapsed.as_millis() as u64,
            });

            match outcome {
                StepOutcome::Completed => {}
                StepOutcome::TimedOut => {
                    warn!("Step {} ({}) timed out, continuing", index, step.describe());
                }
                StepOutcome::Cancelled => {
                    warn!("Mission cancelled during step {}", index);
                    return Ok(MissionOutcome::Cancelled);
                }
            }
        }

        info!("Mission '{}' complete", mission.name);
        Ok(MissionOutcome::Completed)
    }

    fn run_step(&mut self, step: &MissionStep) -> crate::hardware::Result<StepOutcome> {
        match *step {
            MissionStep::Drive {
                speed,
                left_in,
                right_in,
                timeout_s,
            } => {
                let timeout = Duration::from_secs_f32(timeout_s);
                Ok(
                    match self.engine.drive_distance(speed, left_in, right_in, timeout)? {
                        DriveOutcome::Arrived => StepOutcome::Completed,
                        DriveOutcome::TimedOut => StepOutcome::TimedOut,
                        DriveOutcome::Cancelled => StepOutcome::Cancelled,
                    },
                )
            }
            MissionStep::Turn { direction, degrees } => {
                Ok(match self.engine.turn_by_angle(direction, degrees)? {
                    TurnOutcome::Completed => StepOutcome::Completed,
                    TurnOutcome::TimedOut => StepOutcome::TimedOut,
                    TurnOutcome::Cancelled => StepOutcome::Cancelled,
                })
            }
            MissionStep::Launch { count } => Ok(match self.launcher.launch(count)? {
                LaunchOutcome::Completed => StepOutcome::Completed,
                LaunchOutcome::Cancelled => StepOutcome::Cancelled,
            }),
        }
    }

    fn publish(&mut self, status: StepStatus) {
        if let Some(sink) = self.telemetry.as_deref_mut() {
            sink.publish(&status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{FakeClock, SIM_LEFT, SimRig};
    use std::sync::Mutex;

    /// Sink that checks the rest-between-steps invariant at every publish
    struct RestAssertingSink {
        sim: SimRig,
        statuses: Arc<Mutex<Vec<StepStatus>>>,
    }

    impl TelemetrySink for RestAssertingSink {
        fn publish(&mut self, status: &StepStatus) {
            let powers = self.sim.powers();
            assert!(
                powers.iter().all(|p| *p == 0.0),
                "robot not at rest after step {}: {:?}",
                status.index,
                powers
            );
            self.statuses.lock().unwrap().push(status.clone());
        }
    }

    fn runner_on(sim: &SimRig, clock: Arc<dyn Clock>, stop: StopFlag) -> MissionRunner {
        MissionRunner::new(sim.rig(), clock, stop)
    }

    #[test]
    fn test_builtin_missions_resolve() {
        for name in Mission::BUILTIN_NAMES {
            let mission = Mission::builtin(name).unwrap();
            assert!(!mission.steps.is_empty());
        }
        assert!(Mission::builtin("no-such-mission").is_none());
    }

    #[test]
    fn test_mission_script_parses() {
        let text = r#"{
            "name": "test-run",
            "steps": [
                {"kind": "drive", "speed": 0.5, "left_in": -20.0, "right_in": -20.0, "timeout_s": 5.0},
                {"kind": "turn", "direction": "left", "degrees": 90.0},
                {"kind": "launch", "count": 2}
            ]
        }"#;
        let mission = Mission::from_json(text).unwrap();
        assert_eq!(mission.name, "test-run");
        assert_eq!(mission.steps.len(), 3);
        assert!(matches!(
            mission.steps[1],
            MissionStep::Turn {
                direction: TurnDirection::Left,
                degrees
            } if degrees == 90.0
        ));
    }

    #[test]
    fn test_full_mission_runs_in_order_at_rest() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner_on(&sim, Arc::new(clock.clone()), StopFlag::new())
            .with_telemetry(Box::new(RestAssertingSink {
                sim: sim.clone(),
                statuses: statuses.clone(),
            }));

        let mission = Mission::builtin("p2-shoot2-center").unwrap();
        let outcome = runner.run(&mission).unwrap();

        assert_eq!(outcome, MissionOutcome::Completed);

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), mission.steps.len());
        for (i, status) in statuses.iter().enumerate() {
            assert_eq!(status.index, i);
            assert_eq!(status.outcome, StepOutcome::Completed);
        }

        // The left and right quarter turns cancel, up to the tolerance band
        let heading = sim.heading();
        assert!(
            heading <= 2.0 * config::TURN_TOLERANCE_DEG
                || heading >= 360.0 - 2.0 * config::TURN_TOLERANCE_DEG,
            "net heading {} not near 0",
            heading
        );
    }

    #[test]
    fn test_hardware_fault_aborts_mission() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        sim.inject_arm_fault(SIM_LEFT);
        let mut runner = runner_on(&sim, Arc::new(clock.clone()), StopFlag::new());

        let mission = Mission::builtin("p2-shoot2-center").unwrap();
        let result = runner.run(&mission);

        assert!(matches!(
            result,
            Err(MissionError::Hardware { index: 0, .. })
        ));
        assert_eq!(sim.powers(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stop_before_start_runs_nothing() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let stop = StopFlag::new();
        stop.raise();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner_on(&sim, Arc::new(clock.clone()), stop).with_telemetry(Box::new(
            RestAssertingSink {
                sim: sim.clone(),
                statuses: statuses.clone(),
            },
        ));

        let mission = Mission::builtin("p1-shoot2-center").unwrap();
        let outcome = runner.run(&mission).unwrap();

        assert_eq!(outcome, MissionOutcome::Cancelled);
        assert!(statuses.lock().unwrap().is_empty());
        assert_eq!(sim.position(SIM_LEFT), 0);
    }
}
