// Swerve inverse kinematics for the four-corner base
// Converts a field-centric (forward, strafe, rotate) command into per-corner
// (speed, steering angle) setpoints.

use serde::{Deserialize, Serialize};

use super::corner::{CornerId, Corners};
use super::error::ConfigError;
use crate::messages::DriveCommand;

/// Wheel vectors shorter than this are treated as zero (no defined angle)
pub const ZERO_SPEED_EPSILON: f64 = 1e-9;

/// Track width and wheelbase of the base, in any consistent length unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseGeometry {
    pub width: f64,
    pub length: f64,
}

impl BaseGeometry {
    pub fn new(width: f64, length: f64) -> Self {
        Self { width, length }
    }

    /// Both dimensions must be finite and strictly positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if valid(self.width) && valid(self.length) {
            Ok(())
        } else {
            Err(ConfigError::InvalidGeometry {
                width: self.width,
                length: self.length,
            })
        }
    }

    /// Diagonal of the wheel rectangle (R in the kinematics)
    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.length)
    }
}

/// Calculator output for one corner, consumed immediately by the drive train
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelSetpoint {
    /// Normalized drive speed in [-1, 1]
    pub speed: f64,
    /// Steering angle in [0, 360), 0 = straight ahead
    pub angle_deg: f64,
}

/// Stateless swerve calculator for a validated base geometry
#[derive(Debug, Clone, Copy)]
pub struct SwerveCalculator {
    geometry: BaseGeometry,
    length_ratio: f64, // L / R
    width_ratio: f64,  // W / R
}

impl SwerveCalculator {
    /// Fails if either dimension is not strictly positive
    pub fn new(geometry: BaseGeometry) -> Result<Self, ConfigError> {
        geometry.validate()?;
        let diagonal = geometry.diagonal();
        Ok(Self {
            geometry,
            length_ratio: geometry.length / diagonal,
            width_ratio: geometry.width / diagonal,
        })
    }

    pub fn geometry(&self) -> BaseGeometry {
        self.geometry
    }

    /// Compute the four wheel setpoints for a command.
    ///
    /// A corner whose wheel vector has zero length keeps its entry from
    /// `previous_angles`, so a stopped base does not snap its wheels back to 0°.
    pub fn wheel_setpoints(
        &self,
        cmd: &DriveCommand,
        previous_angles: &Corners<f64>,
    ) -> Corners<WheelSetpoint> {
        let forward = sanitize_axis(cmd.forward);
        let strafe = sanitize_axis(cmd.strafe);
        let rotate = sanitize_axis(cmd.rotate);
        let heading = if cmd.heading_deg.is_finite() {
            cmd.heading_deg
        } else {
            0.0
        };

        let (fwd, strafe) = field_to_robot(forward, strafe, heading);

        let a = strafe - rotate * self.length_ratio;
        let b = strafe + rotate * self.length_ratio;
        let c = fwd - rotate * self.width_ratio;
        let d = fwd + rotate * self.width_ratio;

        let mut setpoints = Corners::from_fn(|corner| {
            // Front wheels see B, rear A; left wheels see D, right C
            let x = if corner.is_front() { b } else { a };
            let y = if corner.is_left() { d } else { c };
            wheel_vector(x, y, previous_angles[corner])
        });

        let max_speed = setpoints
            .values()
            .iter()
            .map(|wheel| wheel.speed)
            .fold(0.0f64, f64::max);

        if max_speed > 1.0 {
            for (_, wheel) in setpoints.iter_mut() {
                wheel.speed /= max_speed;
            }
        }

        setpoints
    }

    /// Setpoints without steering memory; zero vectors report 0°
    pub fn wheel_setpoints_from_rest(&self, cmd: &DriveCommand) -> Corners<WheelSetpoint> {
        self.wheel_setpoints(cmd, &Corners::default())
    }

    /// Single-corner helper, mostly for diagnostics
    pub fn wheel_setpoint(&self, corner: CornerId, cmd: &DriveCommand) -> WheelSetpoint {
        self.wheel_setpoints_from_rest(cmd)[corner]
    }
}

/// Rotate a field-frame (forward, strafe) pair into the robot frame
pub fn field_to_robot(forward: f64, strafe: f64, heading_deg: f64) -> (f64, f64) {
    let (sin, cos) = (-heading_deg.to_radians()).sin_cos();
    (forward * cos - strafe * sin, forward * sin + strafe * cos)
}

fn wheel_vector(x: f64, y: f64, previous_angle_deg: f64) -> WheelSetpoint {
    let speed = x.hypot(y);
    if speed < ZERO_SPEED_EPSILON {
        return WheelSetpoint {
            speed: 0.0,
            angle_deg: normalize_degrees(previous_angle_deg),
        };
    }
    WheelSetpoint {
        speed,
        angle_deg: normalize_degrees(x.atan2(y).to_degrees()),
    }
}

fn sanitize_axis(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(angle_deg: f64) -> f64 {
    if !angle_deg.is_finite() {
        return 0.0;
    }
    let wrapped = angle_deg.rem_euclid(360.0);
    // rem_euclid can round tiny negative inputs up to exactly 360
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Convert a steering angle to a sensor reference within one revolution
pub fn angle_to_ticks(angle_deg: f64, counts_per_rev: f64) -> f64 {
    if !(counts_per_rev.is_finite() && counts_per_rev > 0.0) {
        return 0.0;
    }
    let ticks = (angle_deg / 360.0 * counts_per_rev).rem_euclid(counts_per_rev);
    if ticks >= counts_per_rev { 0.0 } else { ticks }
}

/// Inverse of [`angle_to_ticks`]
pub fn ticks_to_angle(ticks: f64, counts_per_rev: f64) -> f64 {
    if !(counts_per_rev.is_finite() && counts_per_rev > 0.0) {
        return 0.0;
    }
    normalize_degrees(ticks / counts_per_rev * 360.0)
}
