// Pivot angle sensor selection shared by the concrete modules
//
// A pivot may carry an absolute analog sensor next to the motor controller's
// integrated relative sensor. Exactly one backs the angle reading at a time,
// and every reading, zero and reference goes through PivotEncoders so the
// source dispatch lives in one place.

use tracing::{debug, info};

use super::error::{ConfigError, ModuleError, Operation};
use super::module::{AnalogEncoder, Axis, EncoderSetting};

pub struct PivotEncoders {
    active: EncoderSetting,
    integrated_cpr: f64,
    /// Integrated reading that corresponds to zero
    integrated_offset: f64,
    /// Integrated readings wrap within one revolution on this hardware
    integrated_wraps: bool,
    analog: Option<Box<dyn AnalogEncoder>>,
}

impl PivotEncoders {
    /// Integrated sensor only
    pub fn new(integrated_cpr: f64) -> Result<Self, ConfigError> {
        check_cpr("integrated", integrated_cpr)?;
        Ok(Self::fixed(integrated_cpr))
    }

    /// For compile-time resolutions known to be positive
    pub(crate) const fn fixed(integrated_cpr: f64) -> Self {
        Self {
            active: EncoderSetting::Integrated,
            integrated_cpr,
            integrated_offset: 0.0,
            integrated_wraps: false,
            analog: None,
        }
    }

    /// Attach an absolute sensor. The integrated sensor stays active.
    pub fn with_analog(mut self, analog: Box<dyn AnalogEncoder>) -> Result<Self, ConfigError> {
        check_cpr("analog", analog.counts_per_rev())?;
        self.analog = Some(analog);
        Ok(self)
    }

    /// Integrated readings are reported modulo one revolution
    pub fn wrapping(mut self) -> Self {
        self.integrated_wraps = true;
        self
    }

    pub fn has_analog(&self) -> bool {
        self.analog.is_some()
    }

    pub fn active(&self) -> EncoderSetting {
        self.active
    }

    /// Switch the active sensor. Never zeroes either sensor.
    pub fn select(&mut self, setting: EncoderSetting) -> Result<(), ModuleError> {
        if setting == self.active {
            return Ok(());
        }
        if setting == EncoderSetting::Analog && self.analog.is_none() {
            return Err(ModuleError::not_supported(
                Axis::Pivot,
                Operation::EncoderSource,
            ));
        }
        info!("Pivot encoder source {:?} -> {:?}", self.active, setting);
        self.active = setting;
        Ok(())
    }

    pub fn counts_per_rev(&self) -> f64 {
        match (self.active, &self.analog) {
            (EncoderSetting::Analog, Some(analog)) => analog.counts_per_rev(),
            _ => self.integrated_cpr,
        }
    }

    pub fn integrated_cpr(&self) -> f64 {
        self.integrated_cpr
    }

    /// Pivot reading in active-sensor counts, given the raw integrated value
    pub fn read(&mut self, integrated_raw: f64) -> Result<f64, ModuleError> {
        let integrated = self.integrated_reading(integrated_raw);
        match self.active_analog() {
            Some(analog) => analog.read_counts(),
            None => Ok(integrated),
        }
    }

    /// Zero the active sensor. Absolute sensors have no origin to move.
    pub fn zero(&mut self, integrated_raw: f64) {
        match self.active {
            EncoderSetting::Integrated => self.zero_integrated(integrated_raw),
            EncoderSetting::Analog => debug!("Zero requested on absolute pivot sensor, ignoring"),
        }
    }

    pub fn zero_integrated(&mut self, integrated_raw: f64) {
        self.integrated_offset = integrated_raw;
    }

    /// Translate a reference in active-sensor counts into a raw integrated
    /// target for the motor controller's own position loop
    pub fn hardware_target(
        &mut self,
        reference: f64,
        integrated_raw: f64,
    ) -> Result<f64, ModuleError> {
        let integrated_cpr = self.integrated_cpr;
        if let Some(analog) = self.active_analog() {
            let analog_cpr = analog.counts_per_rev();
            let current = analog.read_counts()?;
            let delta = shortest_delta(reference - current, analog_cpr);
            return Ok(integrated_raw + delta * integrated_cpr / analog_cpr);
        }

        let target = reference + self.integrated_offset;
        Ok(if self.integrated_wraps {
            target.rem_euclid(integrated_cpr)
        } else {
            target
        })
    }

    fn active_analog(&mut self) -> Option<&mut Box<dyn AnalogEncoder>> {
        match self.active {
            EncoderSetting::Analog => self.analog.as_mut(),
            EncoderSetting::Integrated => None,
        }
    }

    fn integrated_reading(&self, integrated_raw: f64) -> f64 {
        let reading = integrated_raw - self.integrated_offset;
        if self.integrated_wraps {
            reading.rem_euclid(self.integrated_cpr)
        } else {
            reading
        }
    }
}

fn check_cpr(source_name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidCountsPerRev { source_name, value })
    }
}

/// Wrap a count difference into [-cpr/2, cpr/2)
fn shortest_delta(delta: f64, cpr: f64) -> f64 {
    (delta + cpr / 2.0).rem_euclid(cpr) - cpr / 2.0
}
