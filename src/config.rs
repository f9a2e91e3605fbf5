// Timeouts, topics, base geometry, motor configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::motor::{feetech, ModuleIds, DEFAULT_MAX_RAW_VELOCITY};
use crate::swerve::{BaseGeometry, ConfigError, Corners, PidGains};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // drive commands
pub const TOPIC_CMD_ZERO: &str = "swerve/cmd/zero"; // zero all encoders
pub const TOPIC_CMD_ENCODER: &str = "swerve/cmd/encoder"; // pivot sensor selection
pub const TOPIC_TELEMETRY: &str = "swerve/state/telemetry"; // per-corner readings
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Telemetry reads every encoder, so it runs at a fraction of the loop rate
pub const TELEMETRY_EVERY_TICKS: u64 = 5;

// Motor configuration
// Serial port for Feetech motor controller
pub const MOTOR_PORT: &str = "/dev/ttyACM0";

// Enable hardware motor control (set to false for simulation/testing)
pub const MOTOR_ENABLED: bool = true;

// Base dimensions between wheel contact points, meters
pub const BASE_WIDTH: f64 = 0.30;
pub const BASE_LENGTH: f64 = 0.30;

// Pivot closed-loop ramp, seconds to full output
pub const PIVOT_RAMP_SECONDS: f64 = 0.4;

// Servo IDs per corner (drive, pivot)
pub const FRONT_LEFT_IDS: ModuleIds = ModuleIds { drive: 1, pivot: 2 };
pub const FRONT_RIGHT_IDS: ModuleIds = ModuleIds { drive: 3, pivot: 4 };
pub const REAR_LEFT_IDS: ModuleIds = ModuleIds { drive: 5, pivot: 6 };
pub const REAR_RIGHT_IDS: ModuleIds = ModuleIds { drive: 7, pivot: 8 };

/// Full runtime configuration. Missing fields take the defaults above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub port: String,
    pub baudrate: u32,
    pub motor_enabled: bool,
    pub geometry: BaseGeometry,
    pub modules: Corners<ModuleIds>,
    /// Corners whose pivot also reports its absolute angle, selectable at runtime
    pub pivot_absolute: Corners<bool>,
    pub loop_hz: u64,
    pub cmd_timeout_ms: u64,
    /// Raw servo velocity for a full-scale command
    pub max_raw_velocity: i16,
    /// Applied to every pivot at startup when set
    pub pivot_pid: Option<PidGains>,
    /// Seconds from zero to full speed, 0 disables ramping
    pub drive_ramp_seconds: f64,
    /// Closed-loop steering ramp, 0 disables ramping
    pub pivot_ramp_seconds: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baudrate: feetech::DEFAULT_BAUDRATE,
            motor_enabled: MOTOR_ENABLED,
            geometry: BaseGeometry::new(BASE_WIDTH, BASE_LENGTH),
            modules: Corners::new(FRONT_LEFT_IDS, FRONT_RIGHT_IDS, REAR_LEFT_IDS, REAR_RIGHT_IDS),
            pivot_absolute: Corners::default(),
            loop_hz: LOOP_HZ,
            cmd_timeout_ms: CMD_TIMEOUT.as_millis() as u64,
            max_raw_velocity: DEFAULT_MAX_RAW_VELOCITY,
            pivot_pid: None,
            drive_ramp_seconds: 0.0,
            pivot_ramp_seconds: PIVOT_RAMP_SECONDS,
        }
    }
}

impl RobotConfig {
    /// Read a JSON config file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        let config: RobotConfig = serde_json::from_str(&text).map_err(|source| {
            ConfigError::Parse {
                path: path_str.clone(),
                source,
            }
        })?;
        config.validate()?;

        info!("Loaded config from {}", path_str);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry.validate()?;

        let mut seen = Vec::with_capacity(8);
        for (_, ids) in self.modules.iter() {
            for id in [ids.drive, ids.pivot] {
                if seen.contains(&id) {
                    return Err(ConfigError::DuplicateMotorId { id });
                }
                seen.push(id);
            }
        }
        Ok(())
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }

    /// Tick period, never shorter than 1 ms
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis((1000 / self.loop_hz.max(1)).max(1))
    }
}
