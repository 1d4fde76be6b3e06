#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// reference pitch the bin grid is tuned to
pub const A4: f64 = 440.0;

/// threshold shaping of the peak extractor
///
/// below `low_frequency` the `low_*` values apply, above `mid_frequency` the `mid_*` values,
/// in between both are interpolated linearly on the log-frequency axis
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakTuning {
    /// Hz
    pub low_frequency: f64,

    /// half width of the averaging window in semitones
    pub low_width: f64,

    /// amplitude ratio a bin has to exceed its local average by
    pub low_gain: f64,

    /// Hz
    pub mid_frequency: f64,
    pub mid_width: f64,
    pub mid_gain: f64,
}
impl PeakTuning {
    /// tuned for crisp isolated peaks on screen
    pub fn display() -> Self {
        PeakTuning {
            low_frequency: 80.0,
            low_width: 2.0,
            low_gain: 1.059,
            mid_frequency: 300.0,
            mid_width: 0.5,
            mid_gain: 1.122,
        }
    }

    /// tuned for stable partials, feeds the oscillator bank
    pub fn synthesis() -> Self {
        PeakTuning {
            low_frequency: 80.0,
            low_width: 4.0,
            low_gain: 1.122,
            mid_frequency: 300.0,
            mid_width: 1.0,
            mid_gain: 1.035,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        positive("low_frequency", self.low_frequency)?;
        positive("mid_frequency", self.mid_frequency)?;
        if self.low_frequency >= self.mid_frequency {
            return Err(ConfigError::RegionOrder {
                low: self.low_frequency,
                mid: self.mid_frequency,
            });
        }
        non_negative("low_width", self.low_width)?;
        non_negative("mid_width", self.mid_width)?;
        positive("low_gain", self.low_gain)?;
        positive("mid_gain", self.mid_gain)?;
        Ok(())
    }
}
impl Default for PeakTuning {
    fn default() -> Self {
        Self::display()
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalyzerConfig {
    pub sample_rate: u32,

    /// 1 or 2, a mono stream is mirrored into the right channel
    pub channels: u16,

    /// number of semitone groups, the bank has `tone_count * tone_div` bins
    pub tone_count: usize,

    /// bins per semitone
    pub tone_div: usize,

    /// centre frequency of bin 0, see `AnalyzerConfig::default_base_frequency`
    pub base_frequency: f64,

    /// frequency where the bandwidth narrows down to `min_bandwidth`
    pub bandwidth_reference: f64,

    /// semitones of widening per octave below `bandwidth_reference`
    pub bandwidth_per_octave: f64,

    /// semitones, at least 1
    pub min_bandwidth: f64,

    /// scales the speed of the power integrator, higher is faster but less smooth
    pub response: f64,

    /// speed of the integrator behind `curve` and `peaks`, per second
    ///
    /// capped at each band's own `response` rate, so low bands are never faster than their
    /// synthesis power
    pub display_response: f64,

    /// follow the loudest bin with attack and release
    pub auto_gain: bool,

    /// snap the gain to the loudest bin of the current block, overrides `auto_gain`
    pub normalize: bool,

    pub gain_floor: f64,

    /// seconds
    pub attack: f64,

    /// seconds
    pub release: f64,

    /// gain used when neither `auto_gain` nor `normalize` is set
    pub fixed_gain: f64,

    /// process bins on the rayon pool, ignored without the `parallel` feature
    pub parallel: bool,

    pub display_tuning: PeakTuning,
    pub synthesis_tuning: PeakTuning,
}
impl AnalyzerConfig {
    /// `440 * 2^(3/12 + (1/div - 1)/12 - 5)`
    ///
    /// C0 lowered by `1 - 1/div` semitones, so the first group of `div` bins ends on C0
    pub fn default_base_frequency(tone_div: usize) -> f64 {
        let div = tone_div.max(1) as f64;
        A4 * (3.0 / 12.0 + (1.0 / div - 1.0) / 12.0 - 5.0).exp2()
    }

    pub fn bank_count(&self) -> usize {
        self.tone_count * self.tone_div
    }

    /// bins per octave
    pub fn oct_div(&self) -> f64 {
        (self.tone_div * 12) as f64
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::Channels(self.channels));
        }
        if self.tone_count == 0 {
            return Err(ConfigError::Zero { name: "tone_count" });
        }
        if self.tone_div == 0 {
            return Err(ConfigError::Zero { name: "tone_div" });
        }
        positive("base_frequency", self.base_frequency)?;
        let nyquist = self.sample_rate as f64 / 2.0;
        if self.base_frequency >= nyquist {
            return Err(ConfigError::OutOfRange {
                name: "base_frequency",
                value: self.base_frequency,
                min: 0.0,
                max: nyquist,
            });
        }
        positive("bandwidth_reference", self.bandwidth_reference)?;
        non_negative("bandwidth_per_octave", self.bandwidth_per_octave)?;
        at_least("min_bandwidth", self.min_bandwidth, 1.0)?;
        positive("response", self.response)?;
        positive("display_response", self.display_response)?;
        positive("gain_floor", self.gain_floor)?;
        positive("attack", self.attack)?;
        positive("release", self.release)?;
        positive("fixed_gain", self.fixed_gain)?;
        self.display_tuning.validate()?;
        self.synthesis_tuning.validate()?;
        Ok(())
    }
}
impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            sample_rate: 44_100,
            channels: 2,
            tone_count: 126,
            tone_div: 4,
            base_frequency: Self::default_base_frequency(4),
            bandwidth_reference: 300.0,
            bandwidth_per_octave: 1.5,
            min_bandwidth: 1.0,
            response: 1.0,
            display_response: 64.0,
            auto_gain: true,
            normalize: false,
            gain_floor: 1e-3,
            attack: 0.01,
            release: 10.0,
            fixed_gain: 1.0,
            parallel: true,
            display_tuning: PeakTuning::display(),
            synthesis_tuning: PeakTuning::synthesis(),
        }
    }
}

pub(crate) fn positive(name: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

pub(crate) fn non_negative(name: &'static str, value: f64) -> ConfigResult<()> {
    at_least(name, value, 0.0)
}

pub(crate) fn at_least(name: &'static str, value: f64, min: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= min {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max: f64::INFINITY,
        })
    }
}
