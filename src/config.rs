#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::audio::config::PipelineConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::spectrum::config::AnalyzerConfig;
use crate::synth::config::SynthConfig;

/// sample layout exchanged with a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}
impl StreamFormat {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::Channels(self.channels));
        }
        Ok(())
    }
}
impl Default for StreamFormat {
    fn default() -> Self {
        StreamFormat {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// everything needed to build an analyzer, a synthesizer and a pipeline that agree on the format
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    pub synth: SynthConfig,
    pub pipeline: PipelineConfig,
}
impl Config {
    /// same rate and channels everywhere
    pub fn with_format(format: StreamFormat) -> Self {
        let mut config = Config::default();
        config.analyzer.sample_rate = format.sample_rate;
        config.analyzer.channels = format.channels;
        config.pipeline.format = format;
        config
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.analyzer.validate()?;
        self.synth.validate()?;
        self.pipeline.validate()?;

        let format = self.pipeline.format;
        if format.sample_rate != self.analyzer.sample_rate || format.channels != self.analyzer.channels {
            return Err(ConfigError::Mismatch(format!(
                "pipeline runs {} Hz / {} ch, analyzer expects {} Hz / {} ch",
                format.sample_rate, format.channels, self.analyzer.sample_rate, self.analyzer.channels
            )));
        }
        Ok(())
    }
}
