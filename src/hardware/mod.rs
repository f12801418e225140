// Hardware layer for the drive controller board
//
// Provides:
// - Capability traits the motion engine is written against
// - Register-level serial protocol for the controller board
// - Simulated backend for tests and dry runs

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config;

pub mod bus;
pub mod sim;

pub use bus::{BusGyro, BusMotor, BusServo, ControllerBus, SharedBus};

/// Device addresses on the controller bus
pub const MOTOR_LEFT: u8 = 0x01;
pub const MOTOR_RIGHT: u8 = 0x02;
pub const MOTOR_SHOOTER: u8 = 0x03;
pub const SERVO_BALL_RELEASE: u8 = 0x11;
pub const GYRO: u8 = 0x20;

/// Error types for hardware access
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from device {device}: {reason}")]
    InvalidResponse { device: u8, reason: String },

    #[error("Checksum mismatch for device {device}")]
    ChecksumMismatch { device: u8 },

    #[error("Device {device} returned error status: 0x{status:02X}")]
    DeviceError { device: u8, status: u8 },

    #[error("Timeout waiting for response from device {device}")]
    Timeout { device: u8 },

    #[error("Device {device} not responding")]
    NotResponding { device: u8 },

    #[error("Gyro did not report calibrated within the ready window")]
    GyroNotReady,
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Motor wiring polarity. A reversed motor flips commanded power,
/// target positions and reported encoder counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn apply(self, power: f32) -> f32 {
        match self {
            Direction::Forward => power,
            Direction::Reverse => -power,
        }
    }

    pub fn apply_ticks(self, ticks: i32) -> i32 {
        match self {
            Direction::Forward => ticks,
            Direction::Reverse => -ticks,
        }
    }
}

/// Motor run modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    /// Open-loop power control
    WithoutEncoder = 0,
    /// Speed regulated against the encoder; passive between moves
    UsingEncoder = 1,
    /// Closed-loop run toward an armed target position
    ToPosition = 2,
    /// Zero the encoder count and hold
    StopAndReset = 3,
}

/// One traction side (or auxiliary motor) of the drivetrain
pub trait DriveMotor {
    fn set_power(&mut self, power: f32) -> Result<()>;
    fn set_mode(&mut self, mode: RunMode) -> Result<()>;
    /// Arm an absolute target tick count for `RunMode::ToPosition`
    fn set_target(&mut self, ticks: i32) -> Result<()>;
    /// Cumulative encoder ticks since the last reset
    fn position(&mut self) -> Result<i32>;
    /// True while a `ToPosition` move has not yet reached its target
    fn is_busy(&mut self) -> Result<bool>;
}

/// Orientation sensor, reporting heading in degrees [0, 360)
pub trait HeadingSensor {
    fn heading(&mut self) -> Result<f32>;
    fn is_calibrated(&mut self) -> Result<bool>;
    fn recalibrate(&mut self) -> Result<()>;
}

/// Positional servo, commanded in [0, 1]
pub trait Servo {
    fn set_position(&mut self, position: f32) -> Result<()>;
}

/// The full set of actuator and sensor handles a mission needs.
/// Handed to the engine already initialized and at rest.
pub struct Rig {
    pub left: Box<dyn DriveMotor>,
    pub right: Box<dyn DriveMotor>,
    pub shooter: Box<dyn DriveMotor>,
    pub ball_release: Box<dyn Servo>,
    pub gyro: Box<dyn HeadingSensor>,
}

/// Construct and initialize the real hardware.
///
/// Pings every device, resets the drive encoders, leaves all motors at zero
/// power in a passive run mode, parks the ball-release servo and blocks until
/// the gyro finishes calibrating.
pub fn bootstrap(port: &str) -> Result<Rig> {
    info!("Opening controller bus on {}", port);
    let bus = ControllerBus::open(port)?.into_shared();

    for id in [MOTOR_LEFT, MOTOR_RIGHT, MOTOR_SHOOTER, GYRO] {
        match bus.lock().unwrap().ping(id) {
            Ok(true) => debug!("Device 0x{:02X} responding", id),
            Ok(false) => return Err(HardwareError::NotResponding { device: id }),
            Err(e) => return Err(e),
        }
    }

    // Left side runs backwards when wired directly, so it is reversed here
    let mut left = BusMotor::new(bus.clone(), MOTOR_LEFT, Direction::Reverse);
    let mut right = BusMotor::new(bus.clone(), MOTOR_RIGHT, Direction::Forward);
    let mut shooter = BusMotor::new(bus.clone(), MOTOR_SHOOTER, Direction::Forward);

    info!("Resetting drive encoders");
    for motor in [&mut left, &mut right] {
        motor.set_mode(RunMode::StopAndReset)?;
        motor.set_mode(RunMode::UsingEncoder)?;
        motor.set_power(0.0)?;
    }
    shooter.set_mode(RunMode::WithoutEncoder)?;
    shooter.set_power(0.0)?;

    let mut ball_release = BusServo::new(bus.clone(), SERVO_BALL_RELEASE);
    ball_release.set_position(config::BALL_RELEASE_CLOSED)?;

    let mut gyro = BusGyro::new(bus, GYRO);
    info!("Calibrating gyro");
    gyro.recalibrate()?;
    let started = Instant::now();
    while !gyro.is_calibrated()? {
        if started.elapsed() >= config::GYRO_READY_TIMEOUT {
            return Err(HardwareError::GyroNotReady);
        }
        sleep(Duration::from_millis(1000 / config::LOOP_HZ));
    }

    info!("Hardware initialized, all outputs at rest");
    Ok(Rig {
        left: Box::new(left),
        right: Box::new(right),
        shooter: Box::new(shooter),
        ball_release: Box::new(ball_release),
        gyro: Box::new(gyro),
    })
}
