//! ## Example
//! ```
//! use cqsynth::spectrum::{analyzer::Analyzer, config::AnalyzerConfig};
//!
//! let mut analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
//!
//! // interleaved stereo, any length
//! let block = vec![0.0f32; 2 * 441];
//! analyzer.update(&block);
//!
//! let peaks: &[f64] = analyzer.peaks();
//! let gain: f64 = analyzer.auto_gain();
//! ```

use log::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::spectrum::config::{AnalyzerConfig, PeakTuning};
use crate::spectrum::filter::FilterBank;
use crate::spectrum::gain::{AutoGain, GainMode};
use crate::spectrum::peak::{local_threshold, pick_peaks, ThresholdShape};
use crate::spectrum::snapshot::Snapshot;

/// resynthesis input of one bin
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeakRecord {
    /// absolute amplitude of the left channel, 0 unless the bin is a peak
    pub left: f64,
    pub right: f64,

    /// phase increment per sample of the bin's centre frequency, in cycles
    pub delta: f64,
}
impl PeakRecord {
    pub fn max(&self) -> f64 {
        self.left.max(self.right)
    }
}

/// filter bank, auto-gain and both peak extractors behind one `update`
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalyzerConfig,
    bank: FilterBank,
    gain: AutoGain,
    display_shape: ThresholdShape,
    synthesis_shape: ThresholdShape,

    /// semitones, see `set_transpose`
    transpose: f64,

    /// louder channel's display power per bin
    display_power: Vec<f64>,
    channel_power: [Vec<f64>; 2],

    curve: Vec<f64>,
    threshold: Vec<f64>,
    peaks: Vec<f64>,
    records: Vec<PeakRecord>,

    // scratch
    prefix: Vec<f64>,
    values: Vec<f64>,
    synthesis_threshold: Vec<f64>,
    synthesis_peaks: Vec<f64>,
}
impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> ConfigResult<Self> {
        config.validate()?;

        let bank = FilterBank::new(&config);
        let count = bank.len();
        let sample_rate = config.sample_rate as f64;
        let records = bank
            .bands()
            .iter()
            .map(|band| PeakRecord {
                delta: band.frequency / sample_rate,
                ..Default::default()
            })
            .collect();

        Ok(Self {
            gain: AutoGain::new(config.gain_floor, config.attack, config.release, config.sample_rate),
            display_shape: shape(&config, &config.display_tuning, 0.0),
            synthesis_shape: shape(&config, &config.synthesis_tuning, 0.0),
            transpose: 0.0,
            display_power: vec![0.0; count],
            channel_power: [vec![0.0; count], vec![0.0; count]],
            curve: vec![0.0; count],
            threshold: vec![0.0; count],
            peaks: vec![0.0; count],
            records,
            prefix: Vec::with_capacity(count + 1),
            values: vec![0.0; count],
            synthesis_threshold: vec![0.0; count],
            synthesis_peaks: vec![0.0; count],
            bank,
            config,
        })
    }

    /// feeds an interleaved block and refreshes every output
    ///
    /// an incomplete trailing frame is ignored
    pub fn update(&mut self, samples: &[f32]) {
        let channels = self.config.channels as usize;
        let frames = samples.len() / channels;
        if frames == 0 {
            return;
        }
        let samples = &samples[..frames * channels];

        self.bank.process(samples);

        let mut current_max: f64 = 0.0;
        for (i, band) in self.bank.bands().iter().enumerate() {
            let [l, r] = band.power();
            self.channel_power[0][i] = l;
            self.channel_power[1][i] = r;

            let [l, r] = band.display_power();
            self.display_power[i] = l.max(r);
            current_max = current_max.max((2.0 * self.display_power[i]).sqrt());
        }

        let gain = self.gain.update(current_max, frames, self.gain_mode());

        // display, louder channel relative to the gain
        for (value, power) in self.curve.iter_mut().zip(&self.display_power) {
            *value = (2.0 * power).sqrt() / gain;
        }
        local_threshold(
            &self.display_power,
            &self.display_shape,
            gain,
            &mut self.prefix,
            &mut self.threshold,
        );
        pick_peaks(&self.curve, &self.threshold, &mut self.peaks);

        // synthesis, per channel in absolute amplitude
        for ch in 0..2 {
            let power = &self.channel_power[ch];
            for (value, p) in self.values.iter_mut().zip(power) {
                *value = (2.0 * p).sqrt();
            }
            local_threshold(
                power,
                &self.synthesis_shape,
                1.0,
                &mut self.prefix,
                &mut self.synthesis_threshold,
            );
            pick_peaks(&self.values, &self.synthesis_threshold, &mut self.synthesis_peaks);

            for (record, peak) in self.records.iter_mut().zip(&self.synthesis_peaks) {
                match ch {
                    0 => record.left = *peak,
                    _ => record.right = *peak,
                }
            }
        }
    }

    fn gain_mode(&self) -> GainMode {
        if self.config.normalize {
            GainMode::Normalize
        } else if self.config.auto_gain {
            GainMode::Auto
        } else {
            GainMode::Fixed(self.config.fixed_gain)
        }
    }

    /// changes how the gain is derived, takes effect on the next `update`
    pub fn set_gain_mode(&mut self, auto_gain: bool, normalize: bool) {
        if self.config.auto_gain != auto_gain || self.config.normalize != normalize {
            debug!("gain mode: auto {auto_gain}, normalize {normalize}");
        }
        self.config.auto_gain = auto_gain;
        self.config.normalize = normalize;
    }

    /// replaces both threshold tunings, nothing is changed if either is invalid
    pub fn set_tuning(&mut self, display: PeakTuning, synthesis: PeakTuning) -> ConfigResult<()> {
        display.validate()?;
        synthesis.validate()?;

        self.display_shape = shape(&self.config, &display, self.transpose);
        self.synthesis_shape = shape(&self.config, &synthesis, self.transpose);
        self.config.display_tuning = display;
        self.config.synthesis_tuning = synthesis;
        debug!("peak tuning updated: display {display:?}, synthesis {synthesis:?}");
        Ok(())
    }

    /// shifts both threshold shapes for content played `semitones` away from its pitch
    ///
    /// playback at `speed` moves everything by `12 * log2(speed)` semitones, the matching
    /// transpose is the negative of that, see `transpose_for_speed`
    pub fn set_transpose(&mut self, semitones: f64) -> ConfigResult<()> {
        if !semitones.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "transpose",
                value: semitones,
                min: f64::NEG_INFINITY,
                max: f64::INFINITY,
            });
        }
        if semitones == self.transpose {
            return Ok(());
        }

        self.display_shape = shape(&self.config, &self.config.display_tuning, semitones);
        self.synthesis_shape = shape(&self.config, &self.config.synthesis_tuning, semitones);
        self.transpose = semitones;
        debug!("threshold transpose: {semitones:.2} semitones");
        Ok(())
    }

    pub fn transpose(&self) -> f64 {
        self.transpose
    }

    /// clears filter state and gain, keeps the configuration
    pub fn reset(&mut self) {
        self.bank.reset();
        self.gain.reset();
        let [left, right] = &mut self.channel_power;
        for buffer in [
            &mut self.display_power,
            &mut self.curve,
            &mut self.threshold,
            &mut self.peaks,
            left,
            right,
        ] {
            buffer.iter_mut().for_each(|v| *v = 0.0);
        }
        for record in self.records.iter_mut() {
            record.left = 0.0;
            record.right = 0.0;
        }
    }

    /// display peaks relative to the gain, one per above-threshold run
    pub fn peaks(&self) -> &[f64] {
        &self.peaks
    }

    /// display amplitude of every bin relative to the gain
    pub fn curve(&self) -> &[f64] {
        &self.curve
    }

    /// display threshold relative to the gain
    pub fn threshold(&self) -> &[f64] {
        &self.threshold
    }

    pub fn auto_gain(&self) -> f64 {
        self.gain.gain()
    }

    /// loudest display amplitude of the last block
    pub fn max(&self) -> f64 {
        self.gain.max()
    }

    pub fn peak_records(&self) -> &[PeakRecord] {
        &self.records
    }

    /// centre frequency of every bin
    pub fn frequencies(&self) -> Vec<f64> {
        self.bank.bands().iter().map(|b| b.frequency).collect()
    }

    pub fn bank_count(&self) -> usize {
        self.bank.len()
    }

    pub fn tone_div(&self) -> usize {
        self.config.tone_div
    }

    pub fn tone_count(&self) -> usize {
        self.config.tone_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// copies the display outputs for another thread
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            peaks: self.peaks.clone(),
            curve: self.curve.clone(),
            threshold: self.threshold.clone(),
            gain: self.auto_gain(),
            max: self.max(),
        }
    }
}

/// threshold transpose in semitones for a playback speed factor
pub fn transpose_for_speed(speed: f64) -> f64 {
    -12.0 * speed.log2()
}

fn shape(config: &AnalyzerConfig, tuning: &PeakTuning, transpose: f64) -> ThresholdShape {
    ThresholdShape::new(
        tuning,
        config.base_frequency,
        config.tone_div,
        config.bank_count(),
        transpose,
    )
}
