// Feetech STS serial servo protocol
//
// Protocol is similar to Dynamixel Protocol 1.0:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
//
// ServoBus is the register-level seam the swerve modules are written
// against; FeetechBus implements it over a serial port.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech servos
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Position sensor resolution: 4096 steps per revolution
pub const STEPS_PER_REVOLUTION: u16 = 4096;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Register addresses for the STS series
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    // EEPROM area (persists across power cycles)
    ModelNumber = 3,   // 2 bytes, read-only
    Id = 5,            // 1 byte
    PCoefficient = 21, // 1 byte
    DCoefficient = 22, // 1 byte
    ICoefficient = 23, // 1 byte

    // RAM area (volatile)
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte: 0=off (free spin), 1=on (holding)
    Acceleration = 41,    // 1 byte, 100 steps/s^2 per unit, 0 = no ramp
    GoalPosition = 42,    // 2 bytes
    GoalVelocity = 46,    // 2 bytes (sign-magnitude in velocity mode)
    Lock = 55,            // 1 byte: 0=unlocked, 1=locked
    PresentPosition = 56, // 2 bytes, read-only
    PresentVelocity = 58, // 2 bytes, read-only (sign-magnitude)
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    Step = 3,
}

/// Error types for Feetech communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Register-level access to a chain of servos
pub trait ServoBus: Send {
    /// Returns false if the servo did not answer in time
    fn ping(&mut self, id: u8) -> Result<bool>;

    fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()>;

    /// Two bytes, little-endian
    fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()>;

    fn read_u16(&mut self, id: u8, register: Register) -> Result<u16>;

    /// Signed value in the servo's sign-magnitude encoding
    fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    /// Enable holding torque (brake)
    fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    /// Disable torque so the output shaft spins freely (coast)
    fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Set operating mode (torque must be disabled first)
    fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Goal velocity in steps/s (velocity mode)
    fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.write_i16(id, Register::GoalVelocity, velocity)
    }

    fn get_velocity(&mut self, id: u8) -> Result<i16> {
        let raw = self.read_u16(id, Register::PresentVelocity)?;
        Ok(decode_sign_magnitude(raw))
    }

    /// Goal position in steps within one revolution (position mode)
    fn set_goal_position(&mut self, id: u8, position: u16) -> Result<()> {
        self.write_u16(id, Register::GoalPosition, position % STEPS_PER_REVOLUTION)
    }

    fn get_position(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }
}

/// Feetech servo bus - handles serial communication with the servos
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    /// Open a new connection to the servo bus
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

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        // Checksum over id, length, instruction, params
        let checksum = Self::checksum(&packet[2..]);
        packet.push(checksum);

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id: expected_id }
            } else {
                FeetechError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let [id, length] = id_length;

        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }

        // error + params + checksum = length bytes
        let mut remaining = vec![0u8; length as usize];
        self.port.read_exact(&mut remaining)?;
        parse_status(id, length, &remaining)
    }
}

impl ServoBus for FeetechBus {
    fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let packet = Self::build_packet(id, Instruction::Write, &[register as u8, value]);
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        self.read_response(id).map(|_| ())
    }

    fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        let packet = Self::build_packet(id, Instruction::Write, &[register as u8, lo, hi]);
        debug!("Write u16 to servo {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        self.read_response(id).map(|_| ())
    }

    fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, 2]);
        self.send_packet(&packet)?;

        match self.read_response(id)?.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            short => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", short.len()),
            }),
        }
    }
}

/// Validate the tail of a status packet (after id and length) and return
/// its parameters
fn parse_status(id: u8, length: u8, remaining: &[u8]) -> Result<Vec<u8>> {
    let Some((&received_checksum, body)) = remaining.split_last() else {
        return Err(FeetechError::InvalidResponse {
            id,
            reason: "Empty status packet".to_string(),
        });
    };

    let mut checksum_data = vec![id, length];
    checksum_data.extend_from_slice(body);
    if FeetechBus::checksum(&checksum_data) != received_checksum {
        return Err(FeetechError::ChecksumMismatch { id });
    }

    match body.split_first() {
        Some((&0, params)) => Ok(params.to_vec()),
        Some((&status, _)) => Err(FeetechError::ServoError { id, status }),
        None => Err(FeetechError::InvalidResponse {
            id,
            reason: "Missing error byte".to_string(),
        }),
    }
}

/// Encode a signed value to sign-magnitude format
/// Bit 15 = sign (1 = negative), Bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

/// Decode sign-magnitude format to signed value
pub fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}
