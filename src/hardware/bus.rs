// Serial protocol for the drive controller board
//
// The board multiplexes DC motor channels, servo channels and the gyro
// behind one framed register protocol:
// Packet format: [0xAA, 0x55, ID, Length, Op, Params..., Checksum]

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::{Direction, DriveMotor, HardwareError, HeadingSensor, Result, RunMode, Servo};

/// Default serial configuration for the controller board
pub const DEFAULT_BAUDRATE: u32 = 250_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xAA, 0x55];

/// Commanded power is sent as a signed register value in [-1000, 1000]
const POWER_SCALE: f32 = 1000.0;

/// Gyro status bit: set while the zero-point calibration is running
const GYRO_CALIBRATING: u8 = 0x01;

/// Written to the gyro command register to restart calibration
const GYRO_CMD_RECALIBRATE: u8 = 0x4E;

/// Operation set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Ping = 0x01,
    ReadReg = 0x02,
    WriteReg = 0x03,
}

/// Register addresses, unique across device classes
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    // Motor channels
    MotorMode = 0x00,     // 1 byte, RunMode discriminant
    MotorPower = 0x01,    // 2 bytes signed, -1000..=1000
    MotorTarget = 0x02,   // 4 bytes signed, absolute ticks
    MotorPosition = 0x03, // 4 bytes signed, read-only
    MotorBusy = 0x04,     // 1 byte, read-only, nonzero while running to target

    // Servo channels
    ServoPosition = 0x10, // 1 byte, 0..=255

    // Gyro
    GyroHeading = 0x20, // 2 bytes, tenths of a degree, [0, 3600)
    GyroStatus = 0x21,  // 1 byte, bit 0 set while calibrating
    GyroCommand = 0x22, // 1 byte, write-only
}

/// Bus handle shared by the per-device adapters
pub type SharedBus = Arc<Mutex<ControllerBus>>;

/// Controller board bus - handles serial communication with all devices
pub struct ControllerBus {
    port: Box<dyn SerialPort>,
}

impl ControllerBus {
    /// Open a new connection to the controller board
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Wrap the bus for shared ownership by several device adapters
    pub fn into_shared(self) -> SharedBus {
        Arc::new(Mutex::new(self))
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, op: Op, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + op + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(op as u8);
        packet.extend_from_slice(params);

        // Checksum over id, length, op, params
        let checksum_data = &packet[2..]; // skip header
        packet.push(Self::checksum(checksum_data));

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a response packet, returning its parameter bytes
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                HardwareError::Timeout {
                    device: expected_id,
                }
            } else {
                HardwareError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(HardwareError::InvalidResponse {
                device: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(HardwareError::InvalidResponse {
                device: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }

        // Remaining bytes: status + params + checksum = length bytes
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        let expected_checksum = Self::checksum(&checksum_data);
        let received_checksum = remaining[remaining.len() - 1];

        if expected_checksum != received_checksum {
            return Err(HardwareError::ChecksumMismatch { device: id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(HardwareError::DeviceError { device: id, status });
        }

        // Parameters, excluding status byte and checksum
        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    /// Ping a device to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Op::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(HardwareError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a single byte to a register
    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let params = [register as u8, value];
        let packet = Self::build_packet(id, Op::WriteReg, &params);
        debug!(
            "Write u8 to device {}: reg={:?}, value={}",
            id, register, value
        );
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write a signed 16-bit value (little-endian) to a register
    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        let bytes = value.to_le_bytes();
        let params = [register as u8, bytes[0], bytes[1]];
        let packet = Self::build_packet(id, Op::WriteReg, &params);
        debug!(
            "Write i16 to device {}: reg={:?}, value={}",
            id, register, value
        );
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write a signed 32-bit value (little-endian) to a register
    pub fn write_i32(&mut self, id: u8, register: Register, value: i32) -> Result<()> {
        let bytes = value.to_le_bytes();
        let params = [register as u8, bytes[0], bytes[1], bytes[2], bytes[3]];
        let packet = Self::build_packet(id, Op::WriteReg, &params);
        debug!(
            "Write i32 to device {}: reg={:?}, value={}",
            id, register, value
        );
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Read a single byte from a register
    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let params = [register as u8, 1]; // address, length
        let packet = Self::build_packet(id, Op::ReadReg, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.is_empty() {
            return Err(HardwareError::InvalidResponse {
                device: id,
                reason: "Empty response".to_string(),
            });
        }
        Ok(response[0])
    }

    /// Read two bytes (little-endian) from a register
    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let params = [register as u8, 2];
        let packet = Self::build_packet(id, Op::ReadReg, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < 2 {
            return Err(HardwareError::InvalidResponse {
                device: id,
                reason: format!("Expected 2 bytes, got {}", response.len()),
            });
        }
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    /// Read four bytes (little-endian, signed) from a register
    pub fn read_i32(&mut self, id: u8, register: Register) -> Result<i32> {
        let params = [register as u8, 4];
        let packet = Self::build_packet(id, Op::ReadReg, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < 4 {
            return Err(HardwareError::InvalidResponse {
                device: id,
                reason: format!("Expected 4 bytes, got {}", response.len()),
            });
        }
        Ok(i32::from_le_bytes([
            response[0],
            response[1],
            response[2],
            response[3],
        ]))
    }
}

/// Convert a commanded power in [-1, 1] to the board's register value
fn power_to_raw(power: f32) -> i16 {
    (power.clamp(-1.0, 1.0) * POWER_SCALE).round() as i16
}

/// One DC motor channel on the controller board
pub struct BusMotor {
    bus: SharedBus,
    id: u8,
    direction: Direction,
}

impl BusMotor {
    pub fn new(bus: SharedBus, id: u8, direction: Direction) -> Self {
        Self { bus, id, direction }
    }
}

impl DriveMotor for BusMotor {
    fn set_power(&mut self, power: f32) -> Result<()> {
        let raw = power_to_raw(self.direction.apply(power));
        self.bus
            .lock()
            .unwrap()
            .write_i16(self.id, Register::MotorPower, raw)
    }

    fn set_mode(&mut self, mode: RunMode) -> Result<()> {
        self.bus
            .lock()
            .unwrap()
            .write_u8(self.id, Register::MotorMode, mode as u8)
    }

    fn set_target(&mut self, ticks: i32) -> Result<()> {
        let raw = self.direction.apply_ticks(ticks);
        self.bus
            .lock()
            .unwrap()
            .write_i32(self.id, Register::MotorTarget, raw)
    }

    fn position(&mut self) -> Result<i32> {
        let raw = self
            .bus
            .lock()
            .unwrap()
            .read_i32(self.id, Register::MotorPosition)?;
        Ok(self.direction.apply_ticks(raw))
    }

    fn is_busy(&mut self) -> Result<bool> {
        let raw = self
            .bus
            .lock()
            .unwrap()
            .read_u8(self.id, Register::MotorBusy)?;
        Ok(raw != 0)
    }
}

/// One servo channel on the controller board
pub struct BusServo {
    bus: SharedBus,
    id: u8,
}

impl BusServo {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }
}

impl Servo for BusServo {
    fn set_position(&mut self, position: f32) -> Result<()> {
        let raw = (position.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.bus
            .lock()
            .unwrap()
            .write_u8(self.id, Register::ServoPosition, raw)
    }
}

/// The gyro behind the controller board
pub struct BusGyro {
    bus: SharedBus,
    id: u8,
}

impl BusGyro {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }
}

impl HeadingSensor for BusGyro {
    fn heading(&mut self) -> Result<f32> {
        let tenths = self
            .bus
            .lock()
            .unwrap()
            .read_u16(self.id, Register::GyroHeading)?;
        Ok(tenths as f32 / 10.0)
    }

    fn is_calibrated(&mut self) -> Result<bool> {
        let status = self
            .bus
            .lock()
            .unwrap()
            .read_u8(self.id, Register::GyroStatus)?;
        Ok(status & GYRO_CALIBRATING == 0)
    }

    fn recalibrate(&mut self) -> Result<()> {
        self.bus
            .lock()
            .unwrap()
            .write_u8(self.id, Register::GyroCommand, GYRO_CMD_RECALIBRATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // Example: ID=1, Length=4, Op=WRITE, Addr=0x01, Data=0xE8, 0x03
        let data = [1u8, 4, 0x03, 0x01, 0xE8, 0x03];
        let checksum = ControllerBus::checksum(&data);
        // ~(1+4+3+1+0xE8+3) & 0xFF = ~0xF4 & 0xFF = 0x0B
        assert_eq!(checksum, 0x0B);
    }

    #[test]
    fn test_build_packet() {
        let packet = ControllerBus::build_packet(1, Op::Ping, &[]);
        // Header (2) + ID (1) + Length (1) + Op (1) + Checksum (1) = 6 bytes
        assert_eq!(packet.len(), 6);
        assert_eq!(packet[0], 0xAA);
        assert_eq!(packet[1], 0x55);
        assert_eq!(packet[2], 1); // ID
        assert_eq!(packet[3], 2); // Length (op + checksum)
        assert_eq!(packet[4], 0x01); // PING op
    }

    #[test]
    fn test_power_to_raw() {
        assert_eq!(power_to_raw(0.0), 0);
        assert_eq!(power_to_raw(1.0), 1000);
        assert_eq!(power_to_raw(-1.0), -1000);
        assert_eq!(power_to_raw(0.5), 500);
        // Out-of-range commands clamp instead of wrapping
        assert_eq!(power_to_raw(2.5), 1000);
        assert_eq!(power_to_raw(-7.0), -1000);
    }
}
