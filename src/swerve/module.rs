// Capability contract for a single swerve module
//
// Every corner of the base is driven through SwerveModule. The drive train
// never sees motor controllers or registers, so different hardware can sit
// behind different corners. Modules declare what they support through
// ModuleCapabilities, and callers check those flags before invoking an
// optional operation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{ModuleError, Operation};

/// The two actuated axes of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Wheel propulsion
    Drive,
    /// Wheel steering
    Pivot,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Drive => "drive",
            Axis::Pivot => "pivot",
        })
    }
}

/// Which ramp a ramp-rate setting applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampMode {
    OpenLoop,
    ClosedLoop,
}

/// Closed-loop tuning constants for one axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// Error band outside which the integral term is disabled, 0 = off
    #[serde(default)]
    pub i_zone: f64,
    #[serde(default)]
    pub ff: f64,
}

impl PidGains {
    pub fn new(p: f64, i: f64, d: f64) -> Self {
        Self {
            p,
            i,
            d,
            ..Self::default()
        }
    }
}

/// Physical sensor backing a module's angle reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderSetting {
    /// External absolute sensor
    Analog,
    /// Relative sensor inside the motor controller
    #[default]
    Integrated,
}

/// Optional operations supported on one axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisCapabilities {
    pub closed_loop: bool,
    pub pid: bool,
    pub ramp_rate: bool,
}

impl AxisCapabilities {
    pub const FULL: AxisCapabilities = AxisCapabilities {
        closed_loop: true,
        pid: true,
        ramp_rate: true,
    };

    pub const OPEN_LOOP: AxisCapabilities = AxisCapabilities {
        closed_loop: false,
        pid: false,
        ramp_rate: true,
    };

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::ClosedLoopReference => self.closed_loop,
            Operation::PidGains => self.pid,
            Operation::RampRate => self.ramp_rate,
            Operation::EncoderSource => false,
        }
    }
}

/// Everything a module declares about itself up front
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCapabilities {
    pub drive: AxisCapabilities,
    pub pivot: AxisCapabilities,
    /// Module implements [`MultiEncoder`]
    pub multi_encoder: bool,
}

impl ModuleCapabilities {
    pub fn axis(&self, axis: Axis) -> AxisCapabilities {
        match axis {
            Axis::Drive => self.drive,
            Axis::Pivot => self.pivot,
        }
    }

    pub fn supports(&self, axis: Axis, operation: Operation) -> bool {
        match operation {
            Operation::EncoderSource => axis == Axis::Pivot && self.multi_encoder,
            other => self.axis(axis).supports(other),
        }
    }

    /// `Err(NotSupported)` when the operation is not declared for `axis`
    pub fn require(&self, axis: Axis, operation: Operation) -> Result<(), ModuleError> {
        if self.supports(axis, operation) {
            Ok(())
        } else {
            Err(ModuleError::not_supported(axis, operation))
        }
    }
}

/// Uniform operation set over one corner's drive and pivot hardware
pub trait SwerveModule: Send {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> ModuleCapabilities;

    /// Open-loop output in [-1, 1]. Values outside the range are clamped and
    /// the clamped value is what [`SwerveModule::speed`] reports.
    fn set_speed(&mut self, axis: Axis, speed: f64) -> Result<(), ModuleError>;

    /// Last commanded open-loop output
    fn speed(&self, axis: Axis) -> f64;

    /// Raw reading of the axis sensor, in the native unit of the active sensor
    fn encoder_position(&mut self, axis: Axis) -> Result<f64, ModuleError>;

    /// Reset a relative sensor to zero. A no-op for absolute sensors.
    fn zero_encoder(&mut self, axis: Axis) -> Result<(), ModuleError>;

    /// Command zero output immediately
    fn stop_axis(&mut self, axis: Axis) -> Result<(), ModuleError>;

    /// Target position for the hardware's internal controller
    fn set_closed_loop_reference(&mut self, axis: Axis, reference: f64)
    -> Result<(), ModuleError>;

    /// Seconds from zero to full output
    fn set_ramp_rate(&mut self, axis: Axis, mode: RampMode, seconds: f64)
    -> Result<(), ModuleError>;

    fn set_pid_gains(&mut self, axis: Axis, gains: PidGains) -> Result<(), ModuleError>;

    /// Sensor counts per mechanical revolution for the axis' active sensor
    fn counts_per_rev(&self, axis: Axis) -> f64;

    /// Encoder-source extension, if this module has more than one angle sensor
    fn multi_encoder(&self) -> Option<&dyn MultiEncoder> {
        None
    }

    fn multi_encoder_mut(&mut self) -> Option<&mut dyn MultiEncoder> {
        None
    }

    /// Stop both axes. Both are attempted; the first failure is returned.
    fn stop(&mut self) -> Result<(), ModuleError> {
        let pivot = self.stop_axis(Axis::Pivot);
        let drive = self.stop_axis(Axis::Drive);
        pivot.and(drive)
    }

    /// Zero both encoders. Both are attempted; the first failure is returned.
    fn zero(&mut self) -> Result<(), ModuleError> {
        let pivot = self.zero_encoder(Axis::Pivot);
        let drive = self.zero_encoder(Axis::Drive);
        pivot.and(drive)
    }

    /// Stop, then zero. Zeroing runs even if stopping failed.
    fn reset(&mut self) -> Result<(), ModuleError> {
        let stopped = self.stop();
        let zeroed = self.zero();
        stopped.and(zeroed)
    }

    /// Active pivot sensor, `Integrated` for single-sensor modules
    fn pivot_encoder_source(&self) -> EncoderSetting {
        self.multi_encoder()
            .map(|encoders| encoders.encoder_source())
            .unwrap_or_default()
    }
}

/// Runtime selection between the pivot's analog and integrated sensors.
///
/// Switching does not zero the newly active sensor and does not convert
/// references already sent to the hardware.
pub trait MultiEncoder {
    fn set_encoder_source(&mut self, setting: EncoderSetting) -> Result<(), ModuleError>;

    fn encoder_source(&self) -> EncoderSetting;
}

/// An absolute angle sensor read through some analog channel
pub trait AnalogEncoder: Send {
    /// Current reading in counts, within one revolution
    fn read_counts(&mut self) -> Result<f64, ModuleError>;

    fn counts_per_rev(&self) -> f64;
}

/// Clamp an open-loop command into [-1, 1], mapping NaN to 0
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        0.0
    } else {
        speed.clamp(-1.0, 1.0)
    }
}

/// Pivot idle behaviour. Starts in coast so the wheel can be aligned by hand,
/// then latches to brake on the first real command and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PivotIdle {
    #[default]
    Coast,
    Brake,
}

impl PivotIdle {
    /// Latch to brake. Returns true only on the coast -> brake transition.
    pub fn engage(&mut self) -> bool {
        match self {
            PivotIdle::Coast => {
                *self = PivotIdle::Brake;
                true
            }
            PivotIdle::Brake => false,
        }
    }

    pub fn is_braked(&self) -> bool {
        *self == PivotIdle::Brake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_speed() {
        assert_eq!(clamp_speed(0.25), 0.25);
        assert_eq!(clamp_speed(1.5), 1.0);
        assert_eq!(clamp_speed(-7.0), -1.0);
        assert_eq!(clamp_speed(f64::NAN), 0.0);
        assert_eq!(clamp_speed(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_pivot_idle_latch_is_one_way() {
        let mut idle = PivotIdle::default();
        assert!(!idle.is_braked());
        assert!(idle.engage());
        assert!(idle.is_braked());
        assert!(!idle.engage());
        assert!(idle.is_braked());
    }

    #[test]
    fn test_capability_require() {
        let caps = ModuleCapabilities {
            drive: AxisCapabilities::OPEN_LOOP,
            pivot: AxisCapabilities::FULL,
            multi_encoder: false,
        };

        assert!(caps.require(Axis::Pivot, Operation::ClosedLoopReference).is_ok());
        assert!(caps.require(Axis::Drive, Operation::RampRate).is_ok());

        let err = caps
            .require(Axis::Drive, Operation::PidGains)
            .unwrap_err();
        assert!(matches!(
            err,
            ModuleError::NotSupported {
                axis: Axis::Drive,
                operation: Operation::PidGains
            }
        ));
        assert!(!caps.supports(Axis::Pivot, Operation::EncoderSource));
    }

    /// Module whose pivot hardware is unreachable
    #[derive(Default)]
    struct DeadPivot {
        drive_zeroed: bool,
        drive_stopped: bool,
    }

    impl SwerveModule for DeadPivot {
        fn name(&self) -> &str {
            "dead_pivot"
        }

        fn capabilities(&self) -> ModuleCapabilities {
            ModuleCapabilities::default()
        }

        fn set_speed(&mut self, _axis: Axis, _speed: f64) -> Result<(), ModuleError> {
            Ok(())
        }

        fn speed(&self, _axis: Axis) -> f64 {
            0.0
        }

        fn encoder_position(&mut self, _axis: Axis) -> Result<f64, ModuleError> {
            Ok(0.0)
        }

        fn zero_encoder(&mut self, axis: Axis) -> Result<(), ModuleError> {
            match axis {
                Axis::Drive => {
                    self.drive_zeroed = true;
                    Ok(())
                }
                Axis::Pivot => Err(ModuleError::Analog("pivot sensor offline".to_string())),
            }
        }

        fn stop_axis(&mut self, axis: Axis) -> Result<(), ModuleError> {
            match axis {
                Axis::Drive => {
                    self.drive_stopped = true;
                    Ok(())
                }
                Axis::Pivot => Err(ModuleError::BusPoisoned),
            }
        }

        fn set_closed_loop_reference(&mut self, axis: Axis, _reference: f64) -> Result<(), ModuleError> {
            Err(ModuleError::not_supported(axis, Operation::ClosedLoopReference))
        }

        fn set_ramp_rate(&mut self, axis: Axis, _mode: RampMode, _seconds: f64) -> Result<(), ModuleError> {
            Err(ModuleError::not_supported(axis, Operation::RampRate))
        }

        fn set_pid_gains(&mut self, axis: Axis, _gains: PidGains) -> Result<(), ModuleError> {
            Err(ModuleError::not_supported(axis, Operation::PidGains))
        }

        fn counts_per_rev(&self, _axis: Axis) -> f64 {
            4096.0
        }
    }

    #[test]
    fn test_zero_attempts_drive_when_pivot_fails() {
        let mut module = DeadPivot::default();
        let err = module.zero().unwrap_err();
        assert!(matches!(err, ModuleError::Analog(_)));
        assert!(module.drive_zeroed);
    }

    #[test]
    fn test_reset_zeroes_even_when_stop_fails() {
        let mut module = DeadPivot::default();
        let err = module.reset().unwrap_err();
        // First failure wins: the pivot stop
        assert!(matches!(err, ModuleError::BusPoisoned));
        assert!(module.drive_stopped);
        assert!(module.drive_zeroed);
    }

    #[test]
    fn test_pid_gains_deserialize_optional_fields() {
        let gains: PidGains = serde_json::from_str(r#"{"p": 0.1, "i": 0.0001, "d": 1.0}"#).unwrap();
        assert_eq!(gains, PidGains::new(0.1, 0.0001, 1.0));
    }
}
