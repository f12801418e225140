// Loop cadence, encoder geometry, motion tunables
use std::time::Duration;

// Poll frequency inside the blocking motion primitives
pub const LOOP_HZ: u64 = 50;

// Encoder geometry: NeveRest 40 drive motors, direct-driven 4" wheels
pub const COUNTS_PER_MOTOR_REV: f32 = 1120.0;
pub const DRIVE_GEAR_REDUCTION: f32 = 1.0;
pub const WHEEL_DIAMETER_INCHES: f32 = 4.0;

// Ticks per inch of travel, fixed for the life of the robot
pub const COUNTS_PER_INCH: f32 =
    (COUNTS_PER_MOTOR_REV * DRIVE_GEAR_REDUCTION) / (WHEEL_DIAMETER_INCHES * std::f32::consts::PI);

// Default power magnitudes for scripted missions
pub const DRIVE_SPEED: f32 = 0.5;
pub const TURN_SPEED: f32 = 0.5;

// Heading control: stop inside this band of the requested angle
pub const TURN_TOLERANCE_DEG: f32 = 2.0;

// Safety bound on a single turn, separate from the caller-visible drive timeout
pub const TURN_TIMEOUT: Duration = Duration::from_secs(4);

// How long the gyro may take to report calibrated before a call fails fast
pub const GYRO_READY_TIMEOUT: Duration = Duration::from_secs(5);

// Launcher choreography
pub const SHOOTER_POWER: f32 = 0.8;
pub const SHOOTER_SPINUP: Duration = Duration::from_millis(1200);
pub const BALL_RELEASE_CLOSED: f32 = 0.4;
pub const BALL_RELEASE_OPEN: f32 = 0.0;
pub const FEED_DWELL: Duration = Duration::from_millis(600);
pub const RELOAD_DWELL: Duration = Duration::from_millis(400);

// Serial port for the drive controller board
pub const CONTROLLER_PORT: &str = "/dev/ttyACM0";
