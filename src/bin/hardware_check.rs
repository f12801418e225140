// Hardware check: READ-ONLY diagnostic for the controller bus
//
// This tool does NOT write to any actuator - safe to run with the robot on
// the ground. Use it before trusting a mission to the hardware.
//
// Usage: cargo run --bin hardware_check -- [port]

use std::io::{self, Write};

use vortex_auton_runtime::config;
use vortex_auton_runtime::hardware::bus::{ControllerBus, Register};
use vortex_auton_runtime::hardware::{GYRO, MOTOR_LEFT, MOTOR_RIGHT, MOTOR_SHOOTER};

const MOTOR_IDS: [u8; 3] = [MOTOR_LEFT, MOTOR_RIGHT, MOTOR_SHOOTER];
const MOTOR_NAMES: [&str; 3] = ["Left", "Right", "Shooter"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::CONTROLLER_PORT.to_string());

    println!("Controller bus diagnostic (READ-ONLY)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match ControllerBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check the user has permission for the serial device");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging devices...");
    let mut all_found = true;
    for (i, &id) in MOTOR_IDS.iter().enumerate() {
        print!("  Motor {} (ID 0x{:02X}): ", MOTOR_NAMES[i], id);
        io::stdout().flush()?;

        match bus.ping(id) {
            Ok(true) => println!("✓ RESPONDING"),
            Ok(false) => {
                println!("✗ NO RESPONSE");
                all_found = false;
            }
            Err(e) => {
                println!("✗ ERROR: {}", e);
                all_found = false;
            }
        }
    }
    print!("  Gyro (ID 0x{:02X}): ", GYRO);
    io::stdout().flush()?;
    match bus.ping(GYRO) {
        Ok(true) => println!("✓ RESPONDING"),
        Ok(false) => {
            println!("✗ NO RESPONSE");
            all_found = false;
        }
        Err(e) => {
            println!("✗ ERROR: {}", e);
            all_found = false;
        }
    }
    println!();

    if !all_found {
        println!("⚠ WARNING: Not all devices responded!");
        println!("  - Check the controller board power supply");
        println!("  - Verify the device wiring");
        println!();
    }

    println!("Step 3: Reading device state...");
    println!();

    for (i, &id) in MOTOR_IDS.iter().enumerate() {
        println!("  === Motor {} (ID 0x{:02X}) ===", MOTOR_NAMES[i], id);

        match bus.read_u8(id, Register::MotorMode) {
            Ok(mode) => {
                let mode_str = match mode {
                    0 => "WithoutEncoder",
                    1 => "UsingEncoder",
                    2 => "ToPosition",
                    3 => "StopAndReset",
                    _ => "Unknown",
                };
                println!("    Run Mode: {} ({})", mode, mode_str);
            }
            Err(e) => println!("    Run Mode: ERROR - {}", e),
        }

        match bus.read_i32(id, Register::MotorPosition) {
            Ok(pos) => println!("    Position: {} ticks", pos),
            Err(e) => println!("    Position: ERROR - {}", e),
        }

        match bus.read_u8(id, Register::MotorBusy) {
            Ok(busy) => println!("    Busy:     {}", if busy != 0 { "YES" } else { "no" }),
            Err(e) => println!("    Busy:     ERROR - {}", e),
        }

        println!();
    }

    println!("  === Gyro (ID 0x{:02X}) ===", GYRO);
    match bus.read_u8(GYRO, Register::GyroStatus) {
        Ok(status) => {
            let state = if status & 0x01 != 0 {
                "CALIBRATING"
            } else {
                "ready"
            };
            println!("    Status:  0x{:02X} ({})", status, state);
        }
        Err(e) => println!("    Status:  ERROR - {}", e),
    }
    match bus.read_u16(GYRO, Register::GyroHeading) {
        Ok(tenths) => println!("    Heading: {:.1}°", tenths as f32 / 10.0),
        Err(e) => println!("    Heading: ERROR - {}", e),
    }
    println!();

    println!("Diagnostic complete.");
    println!("If all devices responded with sane values:");
    println!("  1. Drive motors should be busy=no with stable positions at rest");
    println!("  2. The gyro should read 'ready' before any mission is started");
    println!();
    println!("Next step: run a mission with --sim first, then on the robot");

    Ok(())
}
