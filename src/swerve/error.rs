// Error types for the swerve core

use std::fmt;

use super::corner::CornerId;
use super::module::Axis;

/// Error raised by whatever hardware driver sits behind a module
pub type BusError = Box<dyn std::error::Error + Send + Sync>;

/// Construction-time configuration failures. A drive train that hits one of
/// these is never built and can never command a motor.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No swerve module provided for: {}", corner_list(.0))]
    MissingModules(Vec<CornerId>),

    #[error("Invalid base dimensions: {width} x {length} (both must be positive)")]
    InvalidGeometry { width: f64, length: f64 },

    #[error("Motor ID {id} is assigned more than once")]
    DuplicateMotorId { id: u8 },

    #[error("Invalid counts per revolution for {source_name} encoder: {value}")]
    InvalidCountsPerRev { source_name: &'static str, value: f64 },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Operations in the module capability contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ClosedLoopReference,
    PidGains,
    RampRate,
    EncoderSource,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ClosedLoopReference => "closed-loop reference",
            Operation::PidGains => "PID gains",
            Operation::RampRate => "ramp rate",
            Operation::EncoderSource => "encoder source selection",
        };
        f.write_str(name)
    }
}

/// Per-call failures of a single swerve module
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("{operation} is not supported on the {axis} axis of this module")]
    NotSupported { axis: Axis, operation: Operation },

    #[error("Motor bus error: {0}")]
    Bus(#[source] BusError),

    #[error("Motor bus lock poisoned")]
    BusPoisoned,

    #[error("Analog encoder read failed: {0}")]
    Analog(String),
}

impl ModuleError {
    pub fn not_supported(axis: Axis, operation: Operation) -> Self {
        ModuleError::NotSupported { axis, operation }
    }
}

/// Failures collected from one drive-train tick. Every corner was still
/// attempted; only the listed ones failed.
#[derive(Debug, thiserror::Error)]
#[error("Dispatch failed on {} corner(s): {}", .failures.len(), failure_list(.failures))]
pub struct DispatchError {
    pub failures: Vec<(CornerId, ModuleError)>,
}

impl DispatchError {
    /// `Ok` when nothing failed
    pub fn from_failures(failures: Vec<(CornerId, ModuleError)>) -> Result<(), DispatchError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError { failures })
        }
    }

    pub fn corners(&self) -> Vec<CornerId> {
        self.failures.iter().map(|(corner, _)| *corner).collect()
    }
}

fn corner_list(corners: &[CornerId]) -> String {
    corners
        .iter()
        .map(CornerId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_list(failures: &[(CornerId, ModuleError)]) -> String {
    failures
        .iter()
        .map(|(corner, err)| format!("{corner}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_modules_message_names_corners() {
        let err = ConfigError::MissingModules(vec![CornerId::FrontRight, CornerId::RearLeft]);
        assert_eq!(
            err.to_string(),
            "No swerve module provided for: FrontRight, RearLeft"
        );
    }

    #[test]
    fn test_dispatch_error_from_failures() {
        assert!(DispatchError::from_failures(Vec::new()).is_ok());

        let err = DispatchError::from_failures(vec![(
            CornerId::RearRight,
            ModuleError::not_supported(Axis::Drive, Operation::ClosedLoopReference),
        )])
        .unwrap_err();
        assert_eq!(err.corners(), vec![CornerId::RearRight]);
        assert!(err.to_string().contains("RearRight"));
        assert!(err.to_string().contains("closed-loop reference"));
    }
}
