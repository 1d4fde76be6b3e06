#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::spectrum::config::positive;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynthConfig {
    /// frequency multiplier, 2.0 is an octave up
    pub pitch: f64,

    /// fraction of the auto-gain a group has to reach to sound
    pub threshold: f64,

    /// divide amplitudes by the auto-gain, so the loudest partial plays at `output_gain`
    pub normalize_output: bool,

    /// per sample amplitude smoothing of the lower register
    pub declick_low: f64,

    /// per sample amplitude smoothing from `declick_split_tone` upwards
    pub declick_high: f64,

    pub declick_split_tone: usize,

    /// how many groups away a reactivated group looks for a phase to adopt
    pub donor_radius: usize,

    pub output_gain: f64,

    /// render groups on the rayon pool, ignored without the `parallel` feature
    pub parallel: bool,
}
impl SynthConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        positive("pitch", self.pitch)?;
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "threshold",
                value: self.threshold,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        declick("declick_low", self.declick_low)?;
        declick("declick_high", self.declick_high)?;
        positive("output_gain", self.output_gain)?;
        Ok(())
    }
}
impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            pitch: 1.0,
            threshold: 1e-3,
            normalize_output: true,
            declick_low: 0.125,
            declick_high: 0.25,
            declick_split_tone: 36,
            donor_radius: 5,
            output_gain: 0.5,
            parallel: true,
        }
    }
}

fn declick(name: &'static str, value: f64) -> ConfigResult<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}
