// Swerve module built from two Feetech servos on a shared bus
//
// The drive servo runs in velocity mode and is open-loop only. The pivot
// servo runs in position mode for closed-loop steering and switches to
// velocity mode when given an open-loop speed. The pivot starts with torque
// off (coast) so the wheel can be aligned by hand, and holds torque from
// its first real command onward.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::feetech::{FeetechError, OperatingMode, Register, ServoBus, STEPS_PER_REVOLUTION};
use crate::swerve::{
    clamp_speed, AnalogEncoder, Axis, AxisCapabilities, ConfigError, EncoderSetting,
    ModuleCapabilities, ModuleError, MultiEncoder, Operation, PidGains, PivotEncoders, PivotIdle,
    RampMode, SwerveModule,
};

/// Maximum raw velocity command (safety limit), steps/s
pub const DEFAULT_MAX_RAW_VELOCITY: i16 = 3000;

/// Largest value the 1-byte coefficient and acceleration registers take
const MAX_BYTE_REGISTER: f64 = 254.0;

/// One bus shared by all the servos on the base
pub type SharedBus<B> = Arc<Mutex<B>>;

/// Servo IDs making up one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIds {
    pub drive: u8,
    pub pivot: u8,
}

pub struct FeetechSwerveModule<B: ServoBus> {
    name: String,
    bus: SharedBus<B>,
    ids: ModuleIds,
    max_raw_velocity: i16,
    drive_speed: f64,
    pivot_speed: f64,
    drive_offset: f64,
    pivot_mode: OperatingMode,
    pivot_idle: PivotIdle,
    encoders: PivotEncoders,
}

impl<B: ServoBus> FeetechSwerveModule<B> {
    pub fn new(name: impl Into<String>, bus: SharedBus<B>, ids: ModuleIds) -> Self {
        Self {
            name: name.into(),
            bus,
            ids,
            max_raw_velocity: DEFAULT_MAX_RAW_VELOCITY,
            drive_speed: 0.0,
            pivot_speed: 0.0,
            drive_offset: 0.0,
            pivot_mode: OperatingMode::Position,
            pivot_idle: PivotIdle::default(),
            encoders: PivotEncoders::fixed(STEPS_PER_REVOLUTION as f64).wrapping(),
        }
    }

    /// Raw velocity sent for a full-scale (1.0) open-loop command
    pub fn with_max_raw_velocity(mut self, max_raw_velocity: i16) -> Self {
        self.max_raw_velocity = max_raw_velocity.saturating_abs();
        self
    }

    /// Add an absolute pivot sensor next to the servo's own
    pub fn with_analog_encoder(
        mut self,
        analog: Box<dyn AnalogEncoder>,
    ) -> Result<Self, ConfigError> {
        self.encoders = self.encoders.with_analog(analog)?;
        Ok(self)
    }

    pub fn ids(&self) -> ModuleIds {
        self.ids
    }

    pub fn pivot_idle(&self) -> PivotIdle {
        self.pivot_idle
    }

    /// Check both servos respond and put them in their starting modes.
    ///
    /// Must be called before the module is driven.
    pub fn initialize(&mut self) -> Result<(), ModuleError> {
        info!(
            "Initializing {} (drive servo {}, pivot servo {})",
            self.name, self.ids.drive, self.ids.pivot
        );
        let ids = self.ids;
        let mut bus = self.bus()?;

        for id in [ids.drive, ids.pivot] {
            if !bus.ping(id)? {
                warn!("Servo {} not responding to ping", id);
                return Err(FeetechError::Timeout { id }.into());
            }
        }

        // Mode changes need torque off
        bus.disable_torque(ids.drive)?;
        bus.set_operating_mode(ids.drive, OperatingMode::Velocity)?;
        bus.enable_torque(ids.drive)?;

        // Pivot is left in coast until first commanded
        bus.disable_torque(ids.pivot)?;
        bus.set_operating_mode(ids.pivot, OperatingMode::Position)?;
        drop(bus);

        self.pivot_mode = OperatingMode::Position;
        Ok(())
    }

    fn bus(&self) -> Result<MutexGuard<'_, B>, ModuleError> {
        self.bus.lock().map_err(|_| ModuleError::BusPoisoned)
    }

    fn raw_velocity(&self, speed: f64) -> i16 {
        (speed * self.max_raw_velocity as f64).round() as i16
    }

    fn pivot_raw(&self) -> Result<f64, ModuleError> {
        Ok(self.bus()?.get_position(self.ids.pivot)? as f64)
    }

    /// First real pivot command: hold torque from now on, and take the
    /// hand-aligned position as zero
    fn latch_pivot(&mut self) -> Result<(), ModuleError> {
        if !self.pivot_idle.engage() {
            return Ok(());
        }
        let raw = self.pivot_raw()?;
        self.encoders.zero_integrated(raw);
        self.bus()?.enable_torque(self.ids.pivot)?;
        info!("{}: pivot braked, zero at raw {}", self.name, raw);
        Ok(())
    }

    fn ensure_pivot_mode(&mut self, mode: OperatingMode) -> Result<(), ModuleError> {
        if self.pivot_mode == mode {
            return Ok(());
        }
        let id = self.ids.pivot;
        let braked = self.pivot_idle.is_braked();
        let mut bus = self.bus()?;
        bus.disable_torque(id)?;
        bus.set_operating_mode(id, mode)?;
        if braked {
            bus.enable_torque(id)?;
        }
        drop(bus);

        debug!("{}: pivot mode {:?} -> {:?}", self.name, self.pivot_mode, mode);
        self.pivot_mode = mode;
        Ok(())
    }
}

impl<B: ServoBus + 'static> FeetechSwerveModule<B> {
    /// Offer the pivot servo's raw magnetic angle as the absolute source
    pub fn with_absolute_pivot(self) -> Result<Self, ConfigError> {
        let sensor = ServoAbsoluteEncoder {
            bus: Arc::clone(&self.bus),
            id: self.ids.pivot,
        };
        self.with_analog_encoder(Box::new(sensor))
    }
}

/// Single-turn position register of a servo, read without any software zero
pub struct ServoAbsoluteEncoder<B: ServoBus> {
    bus: SharedBus<B>,
    id: u8,
}

impl<B: ServoBus> AnalogEncoder for ServoAbsoluteEncoder<B> {
    fn read_counts(&mut self) -> Result<f64, ModuleError> {
        let mut bus = self.bus.lock().map_err(|_| ModuleError::BusPoisoned)?;
        Ok(bus.get_position(self.id)? as f64)
    }

    fn counts_per_rev(&self) -> f64 {
        STEPS_PER_REVOLUTION as f64
    }
}

impl<B: ServoBus> SwerveModule for FeetechSwerveModule<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            drive: AxisCapabilities::OPEN_LOOP,
            pivot: AxisCapabilities::FULL,
            multi_encoder: self.encoders.has_analog(),
        }
    }

    fn set_speed(&mut self, axis: Axis, speed: f64) -> Result<(), ModuleError> {
        let speed = clamp_speed(speed);
        let raw = self.raw_velocity(speed);
        match axis {
            Axis::Drive => {
                self.bus()?.set_velocity(self.ids.drive, raw)?;
                self.drive_speed = speed;
            }
            Axis::Pivot => {
                if speed != 0.0 {
                    self.latch_pivot()?;
                }
                self.ensure_pivot_mode(OperatingMode::Velocity)?;
                self.bus()?.set_velocity(self.ids.pivot, raw)?;
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
            // Single-turn reading; the drive servo does not count revolutions
            Axis::Drive => {
                let raw = self.bus()?.get_position(self.ids.drive)? as f64;
                Ok((raw - self.drive_offset).rem_euclid(STEPS_PER_REVOLUTION as f64))
            }
            Axis::Pivot => {
                let raw = self.pivot_raw()?;
                self.encoders.read(raw)
            }
        }
    }

    fn zero_encoder(&mut self, axis: Axis) -> Result<(), ModuleError> {
        match axis {
            Axis::Drive => {
                let raw = self.bus()?.get_position(self.ids.drive)? as f64;
                self.drive_offset = raw;
            }
            Axis::Pivot => {
                let raw = self.pivot_raw()?;
                self.encoders.zero(raw);
            }
        }
        Ok(())
    }

    fn stop_axis(&mut self, axis: Axis) -> Result<(), ModuleError> {
        match axis {
            Axis::Drive => {
                self.drive_speed = 0.0;
                self.bus()?.set_velocity(self.ids.drive, 0)?;
            }
            Axis::Pivot => {
                self.pivot_speed = 0.0;
                let id = self.ids.pivot;
                let mut bus = self.bus()?;
                match self.pivot_mode {
                    OperatingMode::Position => {
                        // Hold where the wheel is now
                        let present = bus.get_position(id)?;
                        bus.set_goal_position(id, present)?;
                    }
                    _ => bus.set_velocity(id, 0)?,
                }
            }
        }
        Ok(())
    }

    fn set_closed_loop_reference(
        &mut self,
        axis: Axis,
        reference: f64,
    ) -> Result<(), ModuleError> {
        self.capabilities()
            .require(axis, Operation::ClosedLoopReference)?;

        self.latch_pivot()?;
        self.ensure_pivot_mode(OperatingMode::Position)?;

        let raw = self.pivot_raw()?;
        let target = self.encoders.hardware_target(reference, raw)?;
        let steps = target.round().rem_euclid(STEPS_PER_REVOLUTION as f64) as u16;
        debug!("{}: pivot reference {:.1} -> goal {}", self.name, reference, steps);
        self.bus()?.set_goal_position(self.ids.pivot, steps)?;
        Ok(())
    }

    fn set_ramp_rate(
        &mut self,
        axis: Axis,
        mode: RampMode,
        seconds: f64,
    ) -> Result<(), ModuleError> {
        self.capabilities().require(axis, Operation::RampRate)?;

        // One acceleration register serves both ramps
        let acceleration = if seconds > 0.0 {
            let steps_per_s2 = self.max_raw_velocity as f64 / seconds;
            (steps_per_s2 / 100.0).round().clamp(1.0, MAX_BYTE_REGISTER) as u8
        } else {
            0
        };
        let id = match axis {
            Axis::Drive => self.ids.drive,
            Axis::Pivot => self.ids.pivot,
        };
        debug!(
            "{}: {} {:?} ramp {}s -> acceleration {}",
            self.name, axis, mode, seconds, acceleration
        );
        self.bus()?.write_u8(id, Register::Acceleration, acceleration)?;
        Ok(())
    }

    fn set_pid_gains(&mut self, axis: Axis, gains: PidGains) -> Result<(), ModuleError> {
        self.capabilities().require(axis, Operation::PidGains)?;

        if gains.i_zone != 0.0 || gains.ff != 0.0 {
            warn!(
                "{}: servo has no i-zone or feed-forward, ignoring i_zone={} ff={}",
                self.name, gains.i_zone, gains.ff
            );
        }

        let id = self.ids.pivot;
        let mut bus = self.bus()?;
        bus.write_u8(id, Register::PCoefficient, coefficient(gains.p))?;
        bus.write_u8(id, Register::ICoefficient, coefficient(gains.i))?;
        bus.write_u8(id, Register::DCoefficient, coefficient(gains.d))?;
        Ok(())
    }

    fn counts_per_rev(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Drive => STEPS_PER_REVOLUTION as f64,
            Axis::Pivot => self.encoders.counts_per_rev(),
        }
    }

    fn multi_encoder(&self) -> Option<&dyn MultiEncoder> {
        if self.encoders.has_analog() {
            Some(self)
        } else {
            None
        }
    }

    fn multi_encoder_mut(&mut self) -> Option<&mut dyn MultiEncoder> {
        if self.encoders.has_analog() {
            Some(self)
        } else {
            None
        }
    }
}

impl<B: ServoBus> MultiEncoder for FeetechSwerveModule<B> {
    fn set_encoder_source(&mut self, setting: EncoderSetting) -> Result<(), ModuleError> {
        self.encoders.select(setting)
    }

    fn encoder_source(&self) -> EncoderSetting {
        self.encoders.active()
    }
}

impl From<FeetechError> for ModuleError {
    fn from(err: FeetechError) -> Self {
        ModuleError::Bus(Box::new(err))
    }
}

/// Gains map straight onto the servo's 1-byte coefficient registers
fn coefficient(gain: f64) -> u8 {
    if gain.is_finite() {
        gain.round().clamp(0.0, MAX_BYTE_REGISTER) as u8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::feetech::{decode_sign_magnitude, Result as BusResult};
    use std::collections::HashMap;

    /// In-memory register file standing in for the serial bus
    #[derive(Default)]
    struct MockBus {
        registers: HashMap<(u8, Register), u16>,
        writes: Vec<(u8, Register, u16)>,
        offline: Vec<u8>,
    }

    impl MockBus {
        fn get(&self, id: u8, register: Register) -> Option<u16> {
            self.registers.get(&(id, register)).copied()
        }
    }

    impl ServoBus for MockBus {
        fn ping(&mut self, id: u8) -> BusResult<bool> {
            Ok(!self.offline.contains(&id))
        }

        fn write_u8(&mut self, id: u8, register: Register, value: u8) -> BusResult<()> {
            self.write_u16(id, register, value as u16)
        }

        fn write_u16(&mut self, id: u8, register: Register, value: u16) -> BusResult<()> {
            self.registers.insert((id, register), value);
            self.writes.push((id, register, value));
            Ok(())
        }

        fn read_u16(&mut self, id: u8, register: Register) -> BusResult<u16> {
            Ok(self.get(id, register).unwrap_or(0))
        }
    }

    struct FixedAnalog(f64);

    impl AnalogEncoder for FixedAnalog {
        fn read_counts(&mut self) -> Result<f64, ModuleError> {
            Ok(self.0)
        }

        fn counts_per_rev(&self) -> f64 {
            1024.0
        }
    }

    const IDS: ModuleIds = ModuleIds { drive: 1, pivot: 5 };

    fn module() -> (SharedBus<MockBus>, FeetechSwerveModule<MockBus>) {
        let bus = Arc::new(Mutex::new(MockBus::default()));
        let mut module = FeetechSwerveModule::new("front_left", Arc::clone(&bus), IDS);
        module.initialize().unwrap();
        (bus, module)
    }

    fn set_present(bus: &SharedBus<MockBus>, id: u8, position: u16) {
        bus.lock()
            .unwrap()
            .registers
            .insert((id, Register::PresentPosition), position);
    }

    fn reg(bus: &SharedBus<MockBus>, id: u8, register: Register) -> Option<u16> {
        bus.lock().unwrap().get(id, register)
    }

    #[test]
    fn test_initialize_sets_modes_and_leaves_pivot_coasting() {
        let (bus, module) = module();
        assert_eq!(reg(&bus, 1, Register::OperatingMode), Some(OperatingMode::Velocity as u16));
        assert_eq!(reg(&bus, 1, Register::TorqueEnable), Some(1));
        assert_eq!(reg(&bus, 5, Register::OperatingMode), Some(OperatingMode::Position as u16));
        assert_eq!(reg(&bus, 5, Register::TorqueEnable), Some(0));
        assert_eq!(module.pivot_idle(), PivotIdle::Coast);
    }

    #[test]
    fn test_initialize_fails_when_servo_missing() {
        let bus = Arc::new(Mutex::new(MockBus {
            offline: vec![5],
            ..MockBus::default()
        }));
        let mut module = FeetechSwerveModule::new("front_left", bus, IDS);
        let err = module.initialize().unwrap_err();
        match &err {
            ModuleError::Bus(source) => assert!(matches!(
                source.downcast_ref::<FeetechError>(),
                Some(FeetechError::Timeout { id: 5 })
            )),
            other => panic!("expected bus error, got {other:?}"),
        }
    }

    #[test]
    fn test_drive_speed_scaled_and_clamped() {
        let (bus, mut module) = module();

        module.set_speed(Axis::Drive, 0.5).unwrap();
        assert_eq!(reg(&bus, 1, Register::GoalVelocity), Some(1500));

        module.set_speed(Axis::Drive, -2.0).unwrap();
        assert_eq!(module.speed(Axis::Drive), -1.0);
        let raw = reg(&bus, 1, Register::GoalVelocity).unwrap();
        assert_eq!(decode_sign_magnitude(raw), -3000);

        module.stop_axis(Axis::Drive).unwrap();
        assert_eq!(reg(&bus, 1, Register::GoalVelocity), Some(0));
        assert_eq!(module.speed(Axis::Drive), 0.0);
    }

    #[test]
    fn test_first_reference_brakes_and_zeroes_pivot() {
        let (bus, mut module) = module();
        set_present(&bus, 5, 1000);

        module.set_closed_loop_reference(Axis::Pivot, 1024.0).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Brake);
        assert_eq!(reg(&bus, 5, Register::TorqueEnable), Some(1));
        assert_eq!(reg(&bus, 5, Register::GoalPosition), Some(2024));

        // Reading is relative to the latched zero and wraps in one turn
        set_present(&bus, 5, 900);
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 3996.0);

        // Latch happens once
        set_present(&bus, 5, 2024);
        module.set_closed_loop_reference(Axis::Pivot, 3096.0).unwrap();
        assert_eq!(reg(&bus, 5, Register::GoalPosition), Some(0));
    }

    #[test]
    fn test_pivot_open_loop_switches_mode() {
        let (bus, mut module) = module();

        module.set_speed(Axis::Pivot, 0.0).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Coast);

        module.set_speed(Axis::Pivot, 0.25).unwrap();
        assert_eq!(module.pivot_idle(), PivotIdle::Brake);
        assert_eq!(reg(&bus, 5, Register::OperatingMode), Some(OperatingMode::Velocity as u16));
        assert_eq!(reg(&bus, 5, Register::TorqueEnable), Some(1));
        assert_eq!(reg(&bus, 5, Register::GoalVelocity), Some(750));

        module.set_closed_loop_reference(Axis::Pivot, 0.0).unwrap();
        assert_eq!(reg(&bus, 5, Register::OperatingMode), Some(OperatingMode::Position as u16));
        assert_eq!(reg(&bus, 5, Register::TorqueEnable), Some(1));
    }

    #[test]
    fn test_stop_holds_pivot_position() {
        let (bus, mut module) = module();
        module.set_closed_loop_reference(Axis::Pivot, 512.0).unwrap();
        set_present(&bus, 5, 300);

        module.stop().unwrap();
        assert_eq!(reg(&bus, 5, Register::GoalPosition), Some(300));
        assert_eq!(reg(&bus, 1, Register::GoalVelocity), Some(0));
    }

    #[test]
    fn test_drive_axis_is_open_loop_only() {
        let (bus, mut module) = module();
        let writes_before = bus.lock().unwrap().writes.len();

        let err = module.set_closed_loop_reference(Axis::Drive, 100.0).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::NotSupported {
                axis: Axis::Drive,
                operation: Operation::ClosedLoopReference
            }
        ));
        assert!(module.set_pid_gains(Axis::Drive, PidGains::new(1.0, 0.0, 0.0)).is_err());
        // Rejected before anything reached the bus
        assert_eq!(bus.lock().unwrap().writes.len(), writes_before);
    }

    #[test]
    fn test_pivot_pid_and_ramp_registers() {
        let (bus, mut module) = module();

        let gains = PidGains {
            p: 32.0,
            i: 0.4,
            d: 300.0,
            i_zone: 5.0,
            ff: 0.0,
        };
        module.set_pid_gains(Axis::Pivot, gains).unwrap();
        assert_eq!(reg(&bus, 5, Register::PCoefficient), Some(32));
        assert_eq!(reg(&bus, 5, Register::ICoefficient), Some(0));
        assert_eq!(reg(&bus, 5, Register::DCoefficient), Some(254));

        module.set_ramp_rate(Axis::Pivot, RampMode::ClosedLoop, 0.4).unwrap();
        // 3000 steps/s over 0.4 s = 7500 steps/s^2
        assert_eq!(reg(&bus, 5, Register::Acceleration), Some(75));

        module.set_ramp_rate(Axis::Drive, RampMode::OpenLoop, 0.0).unwrap();
        assert_eq!(reg(&bus, 1, Register::Acceleration), Some(0));
    }

    #[test]
    fn test_drive_encoder_zero() {
        let (bus, mut module) = module();
        set_present(&bus, 1, 4000);
        module.zero_encoder(Axis::Drive).unwrap();
        set_present(&bus, 1, 96);
        assert_eq!(module.encoder_position(Axis::Drive).unwrap(), 192.0);
    }

    #[test]
    fn test_analog_source_selection() {
        let bus = Arc::new(Mutex::new(MockBus::default()));
        let mut module = FeetechSwerveModule::new("rear_right", Arc::clone(&bus), IDS)
            .with_analog_encoder(Box::new(FixedAnalog(100.0)))
            .unwrap();
        module.initialize().unwrap();
        assert!(module.capabilities().multi_encoder);

        set_present(&bus, 5, 2000);
        module.zero_encoder(Axis::Pivot).unwrap();

        module
            .multi_encoder_mut()
            .unwrap()
            .set_encoder_source(EncoderSetting::Analog)
            .unwrap();
        assert_eq!(module.encoder_source(), EncoderSetting::Analog);
        assert_eq!(module.counts_per_rev(Axis::Pivot), 1024.0);
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 100.0);

        // 100 -> 356 analog counts is +256, a quarter turn of the servo
        module.set_closed_loop_reference(Axis::Pivot, 356.0).unwrap();
        assert_eq!(reg(&bus, 5, Register::GoalPosition), Some(3024));

        // Switching back did not disturb the integrated zero
        module
            .multi_encoder_mut()
            .unwrap()
            .set_encoder_source(EncoderSetting::Integrated)
            .unwrap();
        set_present(&bus, 5, 2048);
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 48.0);
    }

    #[test]
    fn test_absolute_pivot_reads_raw_servo_angle() {
        let bus = Arc::new(Mutex::new(MockBus::default()));
        let mut module = FeetechSwerveModule::new("front_right", Arc::clone(&bus), IDS)
            .with_absolute_pivot()
            .unwrap();
        module.initialize().unwrap();
        assert!(module.capabilities().multi_encoder);

        set_present(&bus, 5, 2000);
        module.zero_encoder(Axis::Pivot).unwrap();
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 0.0);

        module.set_encoder_source(EncoderSetting::Analog).unwrap();
        assert_eq!(module.encoder_position(Axis::Pivot).unwrap(), 2000.0);

        // Shortest way from 2000 to 1000 is straight back
        module.set_closed_loop_reference(Axis::Pivot, 1000.0).unwrap();
        assert_eq!(reg(&bus, 5, Register::GoalPosition), Some(1000));
    }

    #[test]
    fn test_single_sensor_module_has_no_extension() {
        let (_bus, mut module) = module();
        assert!(!module.capabilities().multi_encoder);
        assert!(module.multi_encoder_mut().is_none());
        assert_eq!(module.encoder_source(), EncoderSetting::Integrated);
    }
}
