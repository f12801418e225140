// Simulated rig for tests and dry runs
//
// Integrates motor positions and chassis heading from the commanded powers,
// so the motion primitives can be exercised without hardware. Read glitches,
// arming faults and stalls are scriptable for the failure-path tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::motion::clock::Clock;
use crate::motion::heading::normalize;

use super::{Direction, DriveMotor, HardwareError, HeadingSensor, Result, Rig, RunMode, Servo};

/// Full-power motor speed, ticks per second
const TICKS_PER_SEC: f32 = 2500.0;

/// Chassis yaw rate per unit of left/right wheel-rate difference, deg/s
const YAW_DEG_PER_SEC: f32 = 90.0;

pub const SIM_LEFT: usize = 0;
pub const SIM_RIGHT: usize = 1;
pub const SIM_SHOOTER: usize = 2;
const MOTOR_COUNT: usize = 3;

struct MotorState {
    mode: RunMode,
    power: f32,
    target: i32,
    position: f32,
    busy: bool,
    stalled: bool,
    power_log: Vec<f32>,
    busy_glitches: u32,
    arm_faults: u32,
}

impl Default for MotorState {
    fn default() -> Self {
        Self {
            mode: RunMode::UsingEncoder,
            power: 0.0,
            target: 0,
            position: 0.0,
            busy: false,
            stalled: false,
            power_log: Vec::new(),
            busy_glitches: 0,
            arm_faults: 0,
        }
    }
}

struct SimState {
    motors: [MotorState; MOTOR_COUNT],
    heading: f32,
    heading_glitches: u32,
    gyro_calibrated: bool,
    servo_position: f32,
    servo_log: Vec<f32>,
    last_step: Duration,
}

/// Shared simulated hardware. Clone handles freely; they all observe the
/// same state, advanced lazily to the clock's current time on every poll.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<SimState>>,
    clock: Arc<dyn Clock>,
}

impl SimRig {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Arc::new(Mutex::new(SimState {
                motors: Default::default(),
                heading: 0.0,
                heading_glitches: 0,
                gyro_calibrated: true,
                servo_position: crate::config::BALL_RELEASE_CLOSED,
                servo_log: Vec::new(),
                last_step: now,
            })),
            clock,
        }
    }

    /// Build the handle bundle the engine and launcher consume
    pub fn rig(&self) -> Rig {
        Rig {
            left: Box::new(SimMotor::new(self.clone(), SIM_LEFT, Direction::Forward)),
            right: Box::new(SimMotor::new(self.clone(), SIM_RIGHT, Direction::Forward)),
            shooter: Box::new(SimMotor::new(self.clone(), SIM_SHOOTER, Direction::Forward)),
            ball_release: Box::new(SimServo::new(self.clone())),
            gyro: Box::new(SimGyro::new(self.clone())),
        }
    }

    /// Advance the physics to the clock's current time
    fn step(state: &mut SimState, now: Duration) {
        let dt = now.saturating_sub(state.last_step).as_secs_f32();
        state.last_step = now;
        if dt == 0.0 {
            return;
        }

        let mut wheel_rate = [0.0f32; MOTOR_COUNT];
        for (i, motor) in state.motors.iter_mut().enumerate() {
            if motor.stalled {
                continue;
            }
            match motor.mode {
                RunMode::ToPosition if motor.busy => {
                    let remaining = motor.target as f32 - motor.position;
                    let rate = TICKS_PER_SEC * motor.power.abs();
                    let step = rate * dt;
                    if step >= remaining.abs() {
                        motor.position = motor.target as f32;
                        motor.busy = false;
                    } else {
                        motor.position += step * remaining.signum();
                    }
                    wheel_rate[i] = remaining.signum() * motor.power.abs();
                }
                RunMode::UsingEncoder | RunMode::WithoutEncoder => {
                    motor.position += TICKS_PER_SEC * motor.power * dt;
                    wheel_rate[i] = motor.power;
                }
                _ => {}
            }
        }

        // Differential yaw: left side forward of right turns clockwise
        let diff = wheel_rate[SIM_LEFT] - wheel_rate[SIM_RIGHT];
        state.heading = normalize(state.heading + diff * YAW_DEG_PER_SEC * dt);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        Self::step(&mut state, self.clock.now());
        f(&mut state)
    }

    // === Inspection and fault-injection hooks ===

    /// Currently commanded powers, post-polarity
    pub fn powers(&self) -> [f32; MOTOR_COUNT] {
        self.with_state(|s| [0, 1, 2].map(|i| s.motors[i].power))
    }

    /// Every power ever commanded to a motor, in order
    pub fn power_log(&self, motor: usize) -> Vec<f32> {
        self.with_state(|s| s.motors[motor].power_log.clone())
    }

    pub fn position(&self, motor: usize) -> i32 {
        self.with_state(|s| s.motors[motor].position.round() as i32)
    }

    pub fn heading(&self) -> f32 {
        self.with_state(|s| s.heading)
    }

    pub fn set_heading(&self, heading: f32) {
        self.with_state(|s| s.heading = normalize(heading));
    }

    pub fn set_calibrated(&self, calibrated: bool) {
        self.with_state(|s| s.gyro_calibrated = calibrated);
    }

    pub fn servo_position(&self) -> f32 {
        self.with_state(|s| s.servo_position)
    }

    pub fn servo_log(&self) -> Vec<f32> {
        self.with_state(|s| s.servo_log.clone())
    }

    /// Make the next `count` heading reads fail
    pub fn inject_heading_glitches(&self, count: u32) {
        self.with_state(|s| s.heading_glitches = count);
    }

    /// Make the next `count` busy reads on a motor fail
    pub fn inject_busy_glitches(&self, motor: usize, count: u32) {
        self.with_state(|s| s.motors[motor].busy_glitches = count);
    }

    /// Make the next target arming on a motor fail
    pub fn inject_arm_fault(&self, motor: usize) {
        self.with_state(|s| s.motors[motor].arm_faults = 1);
    }

    /// A stalled motor holds position and never reaches its target
    pub fn set_stalled(&self, motor: usize, stalled: bool) {
        self.with_state(|s| s.motors[motor].stalled = stalled);
    }
}

/// One simulated motor channel
pub struct SimMotor {
    rig: SimRig,
    index: usize,
    direction: Direction,
}

impl SimMotor {
    pub fn new(rig: SimRig, index: usize, direction: Direction) -> Self {
        Self {
            rig,
            index,
            direction,
        }
    }
}

impl DriveMotor for SimMotor {
    fn set_power(&mut self, power: f32) -> Result<()> {
        let effective = self.direction.apply(power.clamp(-1.0, 1.0));
        self.rig.with_state(|s| {
            let motor = &mut s.motors[self.index];
            motor.power = effective;
            motor.power_log.push(effective);
        });
        Ok(())
    }

    fn set_mode(&mut self, mode: RunMode) -> Result<()> {
        self.rig.with_state(|s| {
            let motor = &mut s.motors[self.index];
            motor.mode = mode;
            match mode {
                RunMode::StopAndReset => {
                    motor.position = 0.0;
                    motor.busy = false;
                }
                RunMode::ToPosition => {
                    motor.busy = motor.position.round() as i32 != motor.target;
                }
                _ => motor.busy = false,
            }
        });
        Ok(())
    }

    fn set_target(&mut self, ticks: i32) -> Result<()> {
        let effective = self.direction.apply_ticks(ticks);
        self.rig.with_state(|s| {
            let motor = &mut s.motors[self.index];
            if motor.arm_faults > 0 {
                motor.arm_faults -= 1;
                return Err(HardwareError::DeviceError {
                    device: self.index as u8,
                    status: 0x7F,
                });
            }
            motor.target = effective;
            if motor.mode == RunMode::ToPosition {
                motor.busy = motor.position.round() as i32 != motor.target;
            }
            Ok(())
        })
    }

    fn position(&mut self) -> Result<i32> {
        let raw = self.rig.with_state(|s| s.motors[self.index].position);
        Ok(self.direction.apply_ticks(raw.round() as i32))
    }

    fn is_busy(&mut self) -> Result<bool> {
        self.rig.with_state(|s| {
            let motor = &mut s.motors[self.index];
            if motor.busy_glitches > 0 {
                motor.busy_glitches -= 1;
                return Err(HardwareError::InvalidResponse {
                    device: self.index as u8,
                    reason: "injected read fault".to_string(),
                });
            }
            Ok(motor.busy)
        })
    }
}

/// One simulated servo channel
pub struct SimServo {
    rig: SimRig,
}

impl SimServo {
    pub fn new(rig: SimRig) -> Self {
        Self { rig }
    }
}

impl Servo for SimServo {
    fn set_position(&mut self, position: f32) -> Result<()> {
        let clamped = position.clamp(0.0, 1.0);
        self.rig.with_state(|s| {
            s.servo_position = clamped;
            s.servo_log.push(clamped);
        });
        Ok(())
    }
}

/// The simulated gyro
pub struct SimGyro {
    rig: SimRig,
}

impl SimGyro {
    pub fn new(rig: SimRig) -> Self {
        Self { rig }
    }
}

impl HeadingSensor for SimGyro {
    fn heading(&mut self) -> Result<f32> {
        self.rig.with_state(|s| {
            if s.heading_glitches > 0 {
                s.heading_glitches -= 1;
                return Err(HardwareError::InvalidResponse {
                    device: super::GYRO,
                    reason: "injected read fault".to_string(),
                });
            }
            Ok(s.heading)
        })
    }

    fn is_calibrated(&mut self) -> Result<bool> {
        self.rig.with_state(|s| Ok(s.gyro_calibrated))
    }

    fn recalibrate(&mut self) -> Result<()> {
        self.rig.with_state(|s| s.gyro_calibrated = true);
        Ok(())
    }
}

/// Deterministic clock for tests: `sleep` advances simulated time
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Clock wrapper that raises a stop flag once simulated time passes a
/// threshold. Lets tests exercise mid-loop cancellation deterministically.
pub struct StopAfter {
    inner: FakeClock,
    stop: crate::motion::engine::StopFlag,
    after: Duration,
}

impl StopAfter {
    pub fn new(inner: FakeClock, stop: crate::motion::engine::StopFlag, after: Duration) -> Self {
        Self { inner, stop, after }
    }
}

impl Clock for StopAfter {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        if self.inner.now() >= self.after {
            self.stop.raise();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_position_reaches_target() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let mut rig = sim.rig();

        rig.left.set_target(1000).unwrap();
        rig.left.set_mode(RunMode::ToPosition).unwrap();
        rig.left.set_power(0.5).unwrap();
        assert!(rig.left.is_busy().unwrap());

        // 1000 ticks at 0.5 power = 1250 ticks/s, done within a second
        clock.advance(Duration::from_secs(1));
        assert!(!rig.left.is_busy().unwrap());
        assert_eq!(rig.left.position().unwrap(), 1000);
    }

    #[test]
    fn test_reverse_polarity_is_transparent() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let mut motor = SimMotor::new(sim.clone(), SIM_LEFT, Direction::Reverse);

        motor.set_target(500).unwrap();
        motor.set_mode(RunMode::ToPosition).unwrap();
        motor.set_power(1.0).unwrap();
        clock.advance(Duration::from_secs(1));

        // Caller-side view is unflipped; the raw state holds the negated power
        assert_eq!(motor.position().unwrap(), 500);
        assert_eq!(sim.position(SIM_LEFT), -500);
        assert_eq!(sim.power_log(SIM_LEFT), vec![-1.0]);
    }

    #[test]
    fn test_opposite_powers_yaw_the_chassis() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let mut rig = sim.rig();

        rig.left.set_power(0.5).unwrap();
        rig.right.set_power(-0.5).unwrap();
        clock.advance(Duration::from_secs(1));

        // Power difference of 1.0 yaws at the full configured rate
        assert!((sim.heading() - YAW_DEG_PER_SEC).abs() < 0.5);
    }

    #[test]
    fn test_stalled_motor_stays_busy() {
        let clock = FakeClock::new();
        let sim = SimRig::new(Arc::new(clock.clone()));
        let mut rig = sim.rig();
        sim.set_stalled(SIM_LEFT, true);

        rig.left.set_target(1000).unwrap();
        rig.left.set_mode(RunMode::ToPosition).unwrap();
        rig.left.set_power(1.0).unwrap();
        clock.advance(Duration::from_secs(10));

        assert!(rig.left.is_busy().unwrap());
        assert_eq!(rig.left.position().unwrap(), 0);
    }
}
