// Swerve drive core for a four-corner independently steered base
//
// Provides:
// - Field-centric swerve inverse kinematics (command -> wheel setpoints)
// - The capability contract every corner module implements
// - The drive train that owns four modules and runs one tick per call
// - A simulated module for running without hardware

mod corner;
mod drive_train;
mod encoder;
mod error;
pub mod kinematics;
mod module;
pub mod sim;

pub use corner::{CornerId, Corners};
pub use drive_train::{DriveTrain, DriveTrainBuilder};
pub use encoder::PivotEncoders;
pub use error::{BusError, ConfigError, DispatchError, ModuleError, Operation};
pub use kinematics::{
    angle_to_ticks, ticks_to_angle, BaseGeometry, SwerveCalculator, WheelSetpoint,
};
pub use module::{
    clamp_speed, AnalogEncoder, Axis, AxisCapabilities, EncoderSetting, ModuleCapabilities,
    MultiEncoder, PidGains, PivotIdle, RampMode, SwerveModule,
};
pub use sim::SimSwerveModule;
