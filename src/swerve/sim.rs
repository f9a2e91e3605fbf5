// In-memory swerve module for running the base without hardware
//
// The pivot shaft jumps straight to its closed-loop target; open-loop
// speeds move the shafts when advance() is called.

use std::sync::{Arc, Mutex};

use tracing::debug;

use super::encoder::PivotEncoders;
use super::error::{ConfigError, ModuleError, Operation};
use super::module::{
    clamp_speed, AnalogEncoder, Axis, AxisCapabilities, EncoderSetting, ModuleCapabilities,
    MultiEncoder, PidGains, PivotIdle, RampMode, SwerveModule,
};

/// Integrated sensor resolution of the simulated motors
pub const SIM_COUNTS_PER_REV: f64 = 4096.0;

/// Resolution of the simulated absolute pivot sensor
pub const SIM_ANALOG_COUNTS_PER_REV: f64 = 1024.0;

/// Shaft revolutions per second at full open-loop output
pub const SIM_FREE_SPEED_RPS: f64 = 5.0;

/// Pivot shaft angle in revolutions, shared with the simulated analog sensor
type Shaft = Arc<Mutex<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PivotControl {
    OpenLoop,
    Position,
}

pub struct SimSwerveModule {
    name: String,
    capabilities: ModuleCapabilities,
    drive_speed: f64,
    pivot_speed: f64,
    drive_turns: f64,
    drive_offset: f64,
    pivot_shaft: Shaft,
    pivot_control: PivotControl,
    pivot_idle: PivotIdle,
    encoders: PivotEncoders,
    references: [Option<f64>; 2],
    gains: [Option<PidGains>; 2],
    ramps: Vec<(Axis, RampMode, f64)>,
}

impl SimSwerveModule {
    /// Fully capable module with only an integrated pivot sensor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ModuleCapabilities {
                drive: AxisCapabilities::FULL,
                pivot: AxisCapabilities::FULL,
                multi_encoder: false,
            },
            drive_speed: 0.0,
            pivot_speed: 0.0,
            drive_turns: 0.0,
            drive_offset: 0.0,
            pivot_shaft: Arc::new(Mutex::new(0.0)),
            pivot_control: PivotControl::OpenLoop,
            pivot_idle: PivotIdle::default(),
            encoders: PivotEncoders::fixed(SIM_COUNTS_PER_REV),
            references: [None; 2],
            gains: [None; 2],
            ramps: Vec::new(),
        }
    }

    /// Add an absolute pivot sensor with the given resolution
    pub fn with_analog_encoder(mut self, counts_per_rev: f64) -> Result<Self, ConfigError> {
        let analog = SimAnalogEncoder {
            shaft: Arc::clone(&self.pivot_shaft),
            counts_per_rev,
        };
        self.encoders = self.encoders.with_analog(Box::new(analog))?;
        self.capabilities.multi_encoder = true;
        Ok(self)
    }

    /// Restrict the declared capabilities of one axis
    pub fn with_axis_capabilities(mut self, axis: Axis, caps: AxisCapabilities) -> Self {
        match axis {
            Axis::Drive => self.capabilities.drive = caps,
            Axis::Pivot => self.capabilities.pivot = caps,
        }
        self
    }

    /// Place the pivot shaft, e.g. to mimic a wheel aligned by hand
    pub fn set_pivot_turns(&mut self, turns: f64) -> Result<(), ModuleError> {
        *lock(&self.pivot_shaft)? = turns;
        Ok(())
    }

    pub fn pivot_turns(&self) -> Result<f64, ModuleError> {
        Ok(*lock(&self.pivot_shaft)?)
    }

    pub fn drive_turns(&self) -> f64 {
        self.drive_turns
    }

    /// Integrate open-loop motion over `seconds`
    pub fn advance(&mut self, seconds: f64) -> Result<(), ModuleError> {
        self.drive_turns += self.drive_speed * SIM_FREE_SPEED_RPS * seconds;
        if self.pivot_control == PivotControl::OpenLoop {
            *lock(&self.pivot_shaft)? += self.pivot_speed * SIM_FREE_SPEED_RPS * seconds;
        }
        Ok(())
    }

    pub fn pivot_idle(&self) -> PivotIdle {
        self.pivot_idle
    }

    /// Last closed-loop reference accepted on `axis`, in active-sensor units
    pub fn last_reference(&self, axis: Axis) -> Option<f64> {
        self.references[axis_slot(axis)]
    }

    pub fn pid_gains(&self, axis: Axis) -> Option<PidGains> {
        self.gains[axis_slot(axis)]
    }

    pub fn ramp_rates(&self) -> &[(Axis, RampMode, f64)] {
        &self.ramps
    }

    fn integrated_pivot_raw(&self) -> Result<f64, ModuleError> {
        Ok(self.pivot_turns()? * SIM_COUNTS_PER_REV)
    }

    fn latch_pivot(&mut self) -> Result<(), ModuleError> {
        if self.pivot_idle.engage() {
            // Wheel was aligned by hand while coasting; that is zero
            let raw = self.integrated_pivot_raw()?;
            self.encoders.zero_integrated(raw);
            debug!("{}: pivot latched to brake at raw {}", self.name, raw);
        }
        Ok(())
    }
}

impl SwerveModule for SimSwerveModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ModuleCapabilities {
        self.capabilities
    }

    fn set_speed(&mut self, axis: Axis, speed: f64) -> Result<(), ModuleError> {
        let speed = clamp_speed(speed);
        match axis {
            Axis::Drive => self.drive_speed = speed,
            Axis::Pivot => {
                if speed != 0.0 {
                    self.latch_pivot()?;
                }
                self.pivot_control = PivotControl::OpenLoop;
                self.pivot_speed = speed;
            }
        }
        Ok(())
    }

    fn speed(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Drive => self.drive_speed,
            Axis::Pivot => self.pivot_speed,
        }
    }

    fn encoder_position(&mut self, axis: Axis) -> Result<f64, ModuleError> {
        match axis {
            Axis::Drive => Ok(self.drive_turns * SIM_COUNTS_PER_REV - self.drive_offset),
            Axis::Pivot => {
                let raw = self.integrated_pivot_raw()?;
                self.encoders.read(raw)
            }
        }
    }

    fn zero_encoder(&mut self, axis: Axis) -> Result<(), ModuleError> {
        match axis {
            Axis::Drive => self.drive_offset = self.drive_turns * SIM_COUNTS_PER_REV,
            Axis::Pivot => {
                let raw = self.integrated_pivot_raw()?;
                self.encoders.zero(raw);
            }
        }
        Ok(())
    }

    fn stop_axis(&mut self, axis: Axis) -> Result<(), ModuleError> {
        match axis {
            Axis::Drive => self.drive_speed = 0.0,
            Axis::Pivot => {
                self.pivot_speed = 0.0;
                self.pivot_control = PivotControl::OpenLoop;
            }
        }
        Ok(())
    }

    fn set_closed_loop_reference(
        &mut self,
        axis: Axis,
        reference: f64,
    ) -> Result<(), ModuleError> {
        self.capabilities
            .require(axis, Operation::ClosedLoopReference)?;

        match axis {
            Axis::Drive => {
                self.drive_turns = (reference + self.drive_offset) / SIM_COUNTS_PER_REV;
            }
            Axis::Pivot => {
                self.latch_pivot()?;
                let raw = self.integrated_pivot_raw()?;
                let target = self.encoders.hardware_target(reference, raw)?;
                self.set_pivot_turns(target / SIM_COUNTS_PER_REV)?;
                self.pivot_control = PivotControl::Position;
            }
        }
        self.references[axis_slot(axis)] = Some(reference);
        Ok(())
    }

    fn set_ramp_rate(
        &mut self,
        axis: Axis,
        mode: RampMode,
        seconds: f64,
    ) -> Result<(), ModuleError> {
        self.capabilities.require(axis, Operation::RampRate)?;
        self.ramps.push((axis, mode, seconds.max(0.0)));
        Ok(())
    }

    fn set_pid_gains(&mut self, axis: Axis, gains: PidGains) -> Result<(), ModuleError> {
        self.capabilities.require(axis, Operation::PidGains)?;
        self.gains[axis_slot(axis)] = Some(gains);
        Ok(())
    }

    fn counts_per_rev(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Drive => SIM_COUNTS_PER_REV,
            Axis::Pivot => self.encoders.counts_per_rev(),
        }
    }

    fn multi_encoder(&self) -> Option<&dyn MultiEncoder> {
        if self.capabilities.multi_encoder {
            Some(self)
        } else {
            None
        }
    }

    fn multi_encoder_mut(&mut self) -> Option<&mut dyn MultiEncoder> {
        if self.capabilities.multi_encoder {
            Some(self)
        } else {
            None
        }
    }
}

impl MultiEncoder for SimSwerveModule {
    fn set_encoder_source(&mut self, setting: EncoderSetting) -> Result<(), ModuleError> {
        self.encoders.select(setting)
    }

    fn encoder_source(&self) -> EncoderSetting {
        self.encoders.active()
    }
}

/// Absolute sensor over the simulated pivot shaft
struct SimAnalogEncoder {
    shaft: Shaft,
    counts_per_rev: f64,
}

impl AnalogEncoder for SimAnalogEncoder {
    fn read_counts(&mut self) -> Result<f64, ModuleError> {
        let turns = *lock(&self.shaft)?;
        Ok(turns.rem_euclid(1.0) * self.counts_per_rev)
    }

    fn counts_per_rev(&self) -> f64 {
        self.counts_per_rev
    }
}

fn lock(shaft: &Shaft) -> Result<std::sync::MutexGuard<'_, f64>, ModuleError> {
    shaft
        .lock()
        .map_err(|_| ModuleError::Analog("simulated shaft lock poisoned".to_string()))
}

fn axis_slot(axis: Axis) -> usize {
    match axis {
        Axis::Drive => 0,
        Axis::Pivot => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_is_clamped_and_reported() {
        let mut module = SimSwerveModule::new("fl");
        module.set_speed(Axis::Drive, 3.0).unwrap();
        assert_eq!(module.speed(Axis::Drive), 1.0);
        module.set_speed(Axis::Drive, -0.4).unwrap();
        assert_eq!(module.speed(Axis::Drive), -0.4);
    }

    #[test]
    fn test_pivot_latches_on_first_command_and_zeroes() {
        let mut module = SimSwerveModule::new("fl");
        module.set_pivot_turns(0.25).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Coast);

        // Zero speed does not count as a command
        module.set_speed(Axis::Pivot, 0.0).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Coast);

        module.set_closed_loop_reference(Axis::Pivot, 0.0).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Brake);
        // The hand-aligned position became zero
        assert!((module.encoder_position(Axis::Pivot).unwrap()).abs() < 1e-9);
        assert!((module.pivot_turns().unwrap() - 0.25).abs() < 1e-9);

        module.stop().unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Brake);
    }

    #[test]
    fn test_pivot_reference_moves_shaft() {
        let mut module = SimSwerveModule::new("fr");
        module.set_closed_loop_reference(Axis::Pivot, 1024.0).unwrap();
        assert!((module.pivot_turns().unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 1024.0);
        assert_eq!(module.last_reference(Axis::Pivot), Some(1024.0));
    }

    #[test]
    fn test_unsupported_operations_are_rejected() {
        let mut module = SimSwerveModule::new("rl")
            .with_axis_capabilities(Axis::Drive, AxisCapabilities::OPEN_LOOP);

        let err = module
            .set_closed_loop_reference(Axis::Drive, 10.0)
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotSupported { axis: Axis::Drive, .. }));
        assert!(module.set_pid_gains(Axis::Drive, PidGains::new(1.0, 0.0, 0.0)).is_err());
        assert!(module.set_ramp_rate(Axis::Drive, RampMode::OpenLoop, 0.5).is_ok());
        assert!(module.set_pid_gains(Axis::Pivot, PidGains::new(0.1, 1e-4, 1.0)).is_ok());
        assert_eq!(module.pid_gains(Axis::Pivot), Some(PidGains::new(0.1, 1e-4, 1.0)));
    }

    #[test]
    fn test_single_encoder_module_has_no_extension() {
        let mut module = SimSwerveModule::new("rr");
        assert!(module.multi_encoder().is_none());
        assert!(module.multi_encoder_mut().is_none());
        assert_eq!(module.encoder_source(), EncoderSetting::Integrated);
    }

    #[test]
    fn test_switching_to_analog_does_not_zero() {
        let mut module = SimSwerveModule::new("fl").with_analog_encoder(1024.0).unwrap();
        module.set_pivot_turns(0.5).unwrap();
        module.zero_encoder(Axis::Pivot).unwrap();
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 0.0);

        module
            .multi_encoder_mut()
            .unwrap()
            .set_encoder_source(EncoderSetting::Analog)
            .unwrap();
        assert_eq!(module.encoder_source(), EncoderSetting::Analog);
        assert_eq!(module.counts_per_rev(Axis::Pivot), 1024.0);
        // Absolute reading, unaffected by the integrated zero
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 512.0);

        // Zero on an absolute sensor is a no-op
        module.zero_encoder(Axis::Pivot).unwrap();
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 512.0);
    }

    #[test]
    fn test_analog_reference_positions_shaft() {
        let mut module = SimSwerveModule::new("fl").with_analog_encoder(1024.0).unwrap();
        module
            .multi_encoder_mut()
            .unwrap()
            .set_encoder_source(EncoderSetting::Analog)
            .unwrap();

        module.set_closed_loop_reference(Axis::Pivot, 768.0).unwrap();
        assert!((module.encoder_position(Axis::Pivot).unwrap() - 768.0).abs() < 1e-6);
    }

    #[test]
    fn test_advance_integrates_open_loop_speed() {
        let mut module = SimSwerveModule::new("fl");
        module.set_speed(Axis::Drive, 0.5).unwrap();
        module.advance(2.0).unwrap();
        assert!((module.drive_turns() - 5.0).abs() < 1e-9);
        assert_eq!(module.encoder_position(Axis::Drive).unwrap(), 5.0 * SIM_COUNTS_PER_REV);

        module.zero().unwrap();
        assert_eq!(module.encoder_position(Axis::Drive).unwrap(), 0.0);
    }
}
