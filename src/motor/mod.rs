// Motor control for the swerve base hardware
//
// Provides:
// - Feetech STS3215 serial protocol implementation
// - Swerve module built from a drive servo and a pivot servo

pub mod feetech;
mod module;

pub use feetech::{FeetechBus, FeetechError, OperatingMode, Register, ServoBus};
pub use module::{
    FeetechSwerveModule, ModuleIds, ServoAbsoluteEncoder, SharedBus, DEFAULT_MAX_RAW_VELOCITY,
};
