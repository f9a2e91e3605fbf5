// Drive-train aggregator: owns the four corner modules and runs one
// kinematics + dispatch cycle per call.
//
// Lifecycle: a DriveTrainBuilder is the uninitialized state. build() either
// yields a ready DriveTrain or a ConfigError, in which case no DriveTrain
// exists and nothing can command a motor.

use tracing::{debug, info, warn};

use super::corner::{CornerId, Corners};
use super::error::{ConfigError, DispatchError, ModuleError, Operation};
use super::kinematics::{angle_to_ticks, BaseGeometry, SwerveCalculator, WheelSetpoint};
use super::module::{Axis, EncoderSetting, SwerveModule};
use crate::messages::{DriveCommand, DriveTelemetry, ModuleTelemetry};

/// Collects the geometry and one module per corner before validation
pub struct DriveTrainBuilder {
    geometry: BaseGeometry,
    modules: Corners<Option<Box<dyn SwerveModule>>>,
}

impl DriveTrainBuilder {
    pub fn new(geometry: BaseGeometry) -> Self {
        Self {
            geometry,
            modules: Corners::from_fn(|_| None),
        }
    }

    /// Assign the module for a corner, replacing any earlier assignment
    pub fn module(self, corner: CornerId, module: impl SwerveModule + 'static) -> Self {
        self.boxed_module(corner, Box::new(module))
    }

    pub fn boxed_module(mut self, corner: CornerId, module: Box<dyn SwerveModule>) -> Self {
        self.modules[corner] = Some(module);
        self
    }

    /// Corners that have no module yet, in slot order
    pub fn missing(&self) -> Vec<CornerId> {
        self.modules
            .iter()
            .filter(|(_, module)| module.is_none())
            .map(|(corner, _)| corner)
            .collect()
    }

    /// Validate and produce a ready drive train
    pub fn build(self) -> Result<DriveTrain, ConfigError> {
        let missing = self.missing();
        let modules = match self.modules.into_values() {
            [Some(fl), Some(fr), Some(rl), Some(rr)] => Corners::new(fl, fr, rl, rr),
            _ => {
                warn!("Drive train not built, missing modules: {:?}", missing);
                return Err(ConfigError::MissingModules(missing));
            }
        };

        let calculator = SwerveCalculator::new(self.geometry).inspect_err(|e| {
            warn!("Drive train not built: {}", e);
        })?;

        for (corner, module) in modules.iter() {
            info!("{} -> {} ({:?})", corner, module.name(), module.capabilities());
        }

        Ok(DriveTrain {
            calculator,
            modules,
            last_setpoints: Corners::default(),
        })
    }
}

/// A validated four-corner swerve base
pub struct DriveTrain {
    calculator: SwerveCalculator,
    modules: Corners<Box<dyn SwerveModule>>,
    last_setpoints: Corners<WheelSetpoint>,
}

impl DriveTrain {
    pub fn builder(geometry: BaseGeometry) -> DriveTrainBuilder {
        DriveTrainBuilder::new(geometry)
    }

    pub fn calculator(&self) -> &SwerveCalculator {
        &self.calculator
    }

    /// Setpoints computed on the most recent drive() call
    pub fn last_setpoints(&self) -> &Corners<WheelSetpoint> {
        &self.last_setpoints
    }

    /// Run one control tick.
    ///
    /// All four corners are always attempted. Corners that fail are reported
    /// together in the returned [`DispatchError`]; the others were commanded.
    pub fn drive(&mut self, cmd: &DriveCommand) -> Result<(), DispatchError> {
        let previous_angles = self.last_setpoints.map(|_, wheel| wheel.angle_deg);
        let setpoints = self.calculator.wheel_setpoints(cmd, &previous_angles);

        debug!(
            "Drive fwd={:.3} str={:.3} rcw={:.3} heading={:.1}",
            cmd.forward, cmd.strafe, cmd.rotate, cmd.heading_deg
        );

        let mut failures = Vec::new();
        for (corner, module) in self.modules.iter_mut() {
            let wheel = setpoints[corner];
            debug!(
                "  {}: speed={:.3} angle={:.1}",
                corner, wheel.speed, wheel.angle_deg
            );
            if let Err(e) = dispatch(module.as_mut(), wheel) {
                warn!("{} ({}) rejected drive command: {}", corner, module.name(), e);
                failures.push((corner, e));
            }
        }

        self.last_setpoints = setpoints;
        DispatchError::from_failures(failures)
    }

    /// Stop all four modules. Every corner is attempted.
    pub fn stop(&mut self) -> Result<(), DispatchError> {
        debug!("Stopping all modules");
        self.for_each_module(|module| module.stop())
    }

    /// Zero every encoder on every module
    pub fn zero(&mut self) -> Result<(), DispatchError> {
        info!("Zeroing all drive train encoders");
        self.for_each_module(|module| module.zero())
    }

    pub fn zero_corner(&mut self, corner: CornerId) -> Result<(), ModuleError> {
        info!("Zeroing encoders on {}", corner);
        self.modules[corner].zero()
    }

    /// Switch a corner's pivot sensor. Fails if the module has only one.
    pub fn set_encoder_source(
        &mut self,
        corner: CornerId,
        setting: EncoderSetting,
    ) -> Result<(), ModuleError> {
        match self.modules[corner].multi_encoder_mut() {
            Some(encoders) => encoders.set_encoder_source(setting),
            None => Err(ModuleError::not_supported(
                Axis::Pivot,
                Operation::EncoderSource,
            )),
        }
    }

    pub fn encoder_source(&self, corner: CornerId) -> EncoderSetting {
        self.modules[corner].pivot_encoder_source()
    }

    pub fn module(&self, corner: CornerId) -> &dyn SwerveModule {
        self.modules[corner].as_ref()
    }

    pub fn module_mut(&mut self, corner: CornerId) -> &mut dyn SwerveModule {
        self.modules[corner].as_mut()
    }

    /// Raw readings for one corner. Failed encoder reads are logged and
    /// reported as `None`.
    pub fn module_telemetry(&mut self, corner: CornerId) -> ModuleTelemetry {
        let module = self.modules[corner].as_mut();
        let mut read = |axis: Axis| match module.encoder_position(axis) {
            Ok(position) => Some(position),
            Err(e) => {
                warn!("{}: {} encoder read failed: {}", corner, axis, e);
                None
            }
        };
        let drive_position = read(Axis::Drive);
        let pivot_position = read(Axis::Pivot);

        ModuleTelemetry {
            drive_speed: module.speed(Axis::Drive),
            pivot_speed: module.speed(Axis::Pivot),
            drive_position,
            pivot_position,
            encoder_source: module.pivot_encoder_source(),
        }
    }

    pub fn telemetry(&mut self) -> DriveTelemetry {
        DriveTelemetry {
            modules: Corners::from_fn(|corner| self.module_telemetry(corner)),
        }
    }

    fn for_each_module(
        &mut self,
        mut op: impl FnMut(&mut dyn SwerveModule) -> Result<(), ModuleError>,
    ) -> Result<(), DispatchError> {
        let mut failures = Vec::new();
        for (corner, module) in self.modules.iter_mut() {
            if let Err(e) = op(module.as_mut()) {
                warn!("{} ({}): {}", corner, module.name(), e);
                failures.push((corner, e));
            }
        }
        DispatchError::from_failures(failures)
    }
}

/// Send one wheel setpoint to a module. If steering cannot be commanded the
/// wheel is not driven.
fn dispatch(module: &mut dyn SwerveModule, wheel: WheelSetpoint) -> Result<(), ModuleError> {
    let steered = module
        .capabilities()
        .require(Axis::Pivot, Operation::ClosedLoopReference)
        .and_then(|()| {
            let ticks = angle_to_ticks(wheel.angle_deg, module.counts_per_rev(Axis::Pivot));
            module.set_closed_loop_reference(Axis::Pivot, ticks)
        });

    match steered {
        Ok(()) => module.set_speed(Axis::Drive, wheel.speed),
        Err(e) => {
            if let Err(stop_err) = module.stop_axis(Axis::Drive) {
                warn!("{}: drive stop after pivot failure also failed: {}", module.name(), stop_err);
            }
            Err(e)
        }
    }
}
