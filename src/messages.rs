// Message types exchanged between teleop, the runtime and diagnostics

use serde::{Deserialize, Serialize};

use crate::swerve::{CornerId, Corners, EncoderSetting};

// Command from teleop/scripts -> runtime
// forward/strafe/rotate are normalized joystick values in [-1, 1];
// heading is the gyro yaw in degrees, unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub forward: f64,
    pub strafe: f64,
    pub rotate: f64,
    #[serde(default)]
    pub heading_deg: f64,
}

impl DriveCommand {
    pub fn new(forward: f64, strafe: f64, rotate: f64, heading_deg: f64) -> Self {
        Self {
            forward,
            strafe,
            rotate,
            heading_deg,
        }
    }

    /// No translation and no rotation requested
    pub fn is_idle(&self) -> bool {
        self.forward == 0.0 && self.strafe == 0.0 && self.rotate == 0.0
    }
}

// Calibration request: switch one corner's pivot sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderSourceRequest {
    pub corner: CornerId,
    pub setting: EncoderSetting,
}

/// Raw per-corner readings for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub drive_speed: f64,
    pub pivot_speed: f64,
    /// `None` when the read failed this tick
    pub drive_position: Option<f64>,
    pub pivot_position: Option<f64>,
    pub encoder_source: EncoderSetting,
}

/// Telemetry for the whole base
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub modules: Corners<ModuleTelemetry>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// At least one corner rejected its command on the last tick
    DispatchFault,
}
