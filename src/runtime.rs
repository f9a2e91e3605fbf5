// 50 Hz loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if teleop crashes and stops sending commands, the base keeps driving
// on its last command

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    RobotConfig, TELEMETRY_EVERY_TICKS, TOPIC_CMD_DRIVE, TOPIC_CMD_ENCODER, TOPIC_CMD_ZERO,
    TOPIC_HEALTH, TOPIC_TELEMETRY,
};
use crate::messages::{DriveCommand, EncoderSourceRequest, RuntimeHealth};
use crate::motor::{FeetechBus, FeetechError, FeetechSwerveModule};
use crate::swerve::{
    Axis, ConfigError, CornerId, DispatchError, DriveTrain, ModuleError, RampMode,
    SimSwerveModule, SwerveModule,
};
use crate::swerve::sim::SIM_ANALOG_COUNTS_PER_REV;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Failed to set up {corner} module: {source}")]
    Module {
        corner: CornerId,
        #[source]
        source: ModuleError,
    },
}

/// What the drive train should do this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Drive(DriveCommand),
    Stop,
}

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    cmd_timeout: Duration,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(cmd_timeout: Duration) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            cmd_timeout,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Decide the tick's action based on watchdog state
    pub fn compute_action(&mut self, now: Instant) -> Action {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        match self.latest_cmd {
            Some(cmd) if cmd_age <= self.cmd_timeout => {
                if self.health == RuntimeHealth::CmdStale {
                    info!("Commands flowing, driving");
                }
                self.health = RuntimeHealth::Ok;
                Action::Drive(cmd)
            }
            Some(_) => {
                // Watchdog triggered - stop the robot
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:?} old), stopping robot", cmd_age);
                }
                self.health = RuntimeHealth::CmdStale;
                Action::Stop
            }
            None => {
                // No command ever received
                self.health = RuntimeHealth::CmdStale;
                Action::Stop
            }
        }
    }

    /// Fold the drive train's result for this tick into health
    pub fn record_dispatch(&mut self, result: &Result<(), DispatchError>) {
        if let Err(e) = result {
            if self.health != RuntimeHealth::DispatchFault {
                warn!("{}", e);
            }
            self.health = RuntimeHealth::DispatchFault;
        }
    }
}

/// Assemble the drive train from config: Feetech servos, or simulated
/// modules when `sim` is set or motors are disabled
pub fn build_drive_train(config: &RobotConfig, sim: bool) -> Result<DriveTrain, RuntimeError> {
    config.validate()?;
    let mut builder = DriveTrain::builder(config.geometry);

    if sim || !config.motor_enabled {
        info!("Using simulated swerve modules");
        for corner in CornerId::ALL {
            let mut module = SimSwerveModule::new(corner.to_string());
            if config.pivot_absolute[corner] {
                module = module.with_analog_encoder(SIM_ANALOG_COUNTS_PER_REV)?;
            }
            apply_tuning(&mut module, config)
                .map_err(|source| RuntimeError::Module { corner, source })?;
            builder = builder.module(corner, module);
        }
        return Ok(builder.build()?);
    }

    info!("Opening motor bus on {} @ {} baud", config.port, config.baudrate);
    let bus = Arc::new(Mutex::new(FeetechBus::open_with_baudrate(
        &config.port,
        config.baudrate,
    )?));

    for (corner, &ids) in config.modules.iter() {
        let mut module = FeetechSwerveModule::new(corner.to_string(), Arc::clone(&bus), ids)
            .with_max_raw_velocity(config.max_raw_velocity);
        if config.pivot_absolute[corner] {
            module = module.with_absolute_pivot()?;
        }
        module
            .initialize()
            .and_then(|()| apply_tuning(&mut module, config))
            .map_err(|source| RuntimeError::Module { corner, source })?;
        builder = builder.module(corner, module);
    }

    Ok(builder.build()?)
}

/// Startup gains and ramps, shared by every backend
fn apply_tuning(module: &mut dyn SwerveModule, config: &RobotConfig) -> Result<(), ModuleError> {
    if let Some(gains) = config.pivot_pid {
        module.set_pid_gains(Axis::Pivot, gains)?;
    }
    module.set_ramp_rate(Axis::Drive, RampMode::OpenLoop, config.drive_ramp_seconds)?;
    module.set_ramp_rate(Axis::Pivot, RampMode::ClosedLoop, config.pivot_ramp_seconds)?;
    Ok(())
}

pub async fn run(
    config: RobotConfig,
    sim: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut drive = build_drive_train(&config, sim)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_drive = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_zero = session.declare_subscriber(TOPIC_CMD_ZERO).await?;
    let sub_encoder = session.declare_subscriber(TOPIC_CMD_ENCODER).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(config.cmd_timeout());
    let mut tick = interval(config.loop_period());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        config.loop_hz, config.cmd_timeout_ms
    );
    info!(
        "Subscribed to: {}, {}, {}",
        TOPIC_CMD_DRIVE, TOPIC_CMD_ZERO, TOPIC_CMD_ENCODER
    );
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
        ticks = ticks.wrapping_add(1);

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_drive.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, Instant::now()),
                Err(e) => warn!("Failed to parse drive command: {}", e),
            }
        }

        // 2. Calibration requests
        while let Ok(Some(_)) = sub_zero.try_recv() {
            info!("Zeroing all encoders");
            if let Err(e) = drive.zero() {
                warn!("{}", e);
            }
        }
        while let Ok(Some(sample)) = sub_encoder.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<EncoderSourceRequest>(&payload) {
                Ok(req) => {
                    if let Err(e) = drive.set_encoder_source(req.corner, req.setting) {
                        warn!("{}: encoder source not changed: {}", req.corner, e);
                    }
                }
                Err(e) => warn!("Failed to parse encoder request: {}", e),
            }
        }

        // 3. Act (includes watchdog logic)
        let result = match runtime.compute_action(Instant::now()) {
            Action::Drive(cmd) => drive.drive(&cmd),
            Action::Stop => drive.stop(),
        };
        runtime.record_dispatch(&result);

        // 4. Publish health, telemetry at a lower rate
        publish_json(&pub_health, &runtime.health()).await;
        if ticks % TELEMETRY_EVERY_TICKS == 0 {
            publish_json(&pub_telemetry, &drive.telemetry()).await;
        }
    }

    info!("Stopping drive train");
    if let Err(e) = drive.stop() {
        warn!("{}", e);
    }
    Ok(())
}

async fn publish_json<T: serde::Serialize>(publisher: &zenoh::pubsub::Publisher<'_>, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Err(e) = publisher.put(json).await {
                warn!("Publish failed: {}", e);
            }
        }
        Err(e) => warn!("Failed to encode message: {}", e),
    }
}
