//! additive resynthesis from the analyzer's peaks
//!
//! every tone group of the bank drives one sine. Per block a group picks the loudest of its
//! bins as frequency source, takes the per channel maxima as target amplitudes and is then
//! rendered sample by sample with declicked amplitude. Phases are never reset, a group that
//! comes back from silence borrows the phase of a sounding neighbour instead.

use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::ConfigResult;
use crate::spectrum::{Analyzer, AnalyzerConfig, PeakRecord};
use crate::synth::config::SynthConfig;
use crate::synth::oscillator::{SineTable, ToneOscillator};

/// fractional part of the golden ratio, spreads start phases without a random generator
const GOLDEN: f64 = 0.618_033_988_749_894_9;

pub struct WaveSynth {
    config: SynthConfig,
    table: SineTable,
    oscillators: Vec<ToneOscillator>,
    tone_div: usize,
    channels: usize,

    /// amplitude below which a group is treated as silent, in output scale
    floor: f64,
}
impl WaveSynth {
    /// one oscillator per tone group of the analyzer described by `analyzer`
    pub fn new(config: SynthConfig, analyzer: &AnalyzerConfig) -> ConfigResult<Self> {
        config.validate()?;
        analyzer.validate()?;

        let oscillators = (0..analyzer.tone_count)
            .map(|tone| ToneOscillator::new(tone as f64 * GOLDEN, declick_for(&config, tone)))
            .collect();

        Ok(Self {
            table: SineTable::new(),
            oscillators,
            tone_div: analyzer.tone_div,
            channels: analyzer.channels as usize,
            floor: 0.0,
            config,
        })
    }

    /// renders the current peaks of `analyzer` into `out`, overwriting it
    ///
    /// `out` is interleaved with the analyzer's channel count
    pub fn write_buffer(&mut self, analyzer: &Analyzer, out: &mut [f32]) {
        self.write_records(analyzer.peak_records(), analyzer.auto_gain(), out);
    }

    /// same as `write_buffer` with explicit peaks and gain
    pub fn write_records(&mut self, records: &[PeakRecord], gain: f64, out: &mut [f32]) {
        self.retune(records, gain);
        self.render(out);
    }

    /// step 1 to 3: frequency and target per group, gating and phase donation
    pub(crate) fn retune(&mut self, records: &[PeakRecord], gain: f64) {
        let gain = gain.max(f64::MIN_POSITIVE);
        let scale = if self.config.normalize_output {
            self.config.output_gain / gain
        } else {
            self.config.output_gain
        };
        let gate = self.config.threshold * gain;
        self.floor = gate * scale;

        let pitch = self.config.pitch;
        let div = self.tone_div;

        for tone in 0..self.oscillators.len() {
            let Some(bins) = records.get(tone * div..(tone + 1) * div) else {
                break;
            };

            let mut delta = (bins[0].delta * bins[div - 1].delta).sqrt();
            let mut loudest = 0.0;
            let mut target = [0.0, 0.0];
            for bin in bins {
                if bin.max() > loudest {
                    loudest = bin.max();
                    delta = bin.delta;
                }
                target[0] = bin.left.max(target[0]);
                target[1] = bin.right.max(target[1]);
            }

            let target = if loudest < gate {
                [0.0, 0.0]
            } else {
                target.map(|t| if t < gate { 0.0 } else { t * scale })
            };

            let reactivating = target != [0.0, 0.0] && self.oscillators[tone].amplitude == [0.0, 0.0];
            if reactivating {
                if let Some(phase) = self.donor_phase(tone) {
                    self.oscillators[tone].phase = phase;
                }
            }

            let osc = &mut self.oscillators[tone];
            osc.delta = delta * pitch;
            osc.target = target;
        }
    }

    /// phase of the nearest sounding group, a louder upper neighbour beats the lower one
    fn donor_phase(&self, tone: usize) -> Option<f64> {
        let radius = self.config.donor_radius;
        let sounding = |i: &usize| self.oscillators[*i].loudness() > self.floor;

        let lower = (tone.saturating_sub(radius)..tone).rev().find(sounding);
        let upper = (tone + 1..=(tone + radius).min(self.oscillators.len() - 1)).find(sounding);

        let donor = match (lower, upper) {
            (Some(l), Some(u)) if self.oscillators[u].loudness() > self.oscillators[l].loudness() => Some(u),
            (Some(l), _) => Some(l),
            (None, u) => u,
        };
        donor.map(|i| self.oscillators[i].phase)
    }

    /// step 4: sums every oscillator into `out`
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        let channels = self.channels;
        let floor = self.floor;
        let table = &self.table;

        #[cfg(feature = "parallel")]
        if self.config.parallel {
            let len = out.len();
            let mixed = self
                .oscillators
                .par_iter_mut()
                .fold(
                    || vec![0.0f32; len],
                    |mut buffer, osc| {
                        osc.render(table, &mut buffer, channels, floor);
                        buffer
                    },
                )
                .reduce(
                    || vec![0.0f32; len],
                    |mut a, b| {
                        a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
                        a
                    },
                );
            out.copy_from_slice(&mixed);
            return;
        }

        for osc in self.oscillators.iter_mut() {
            osc.render(table, out, channels, floor);
        }
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        if pitch.is_finite() && pitch > 0.0 && pitch != self.config.pitch {
            debug!("synth pitch: {pitch}");
            self.config.pitch = pitch;
        }
    }

    pub fn pitch(&self) -> f64 {
        self.config.pitch
    }

    pub fn oscillators(&self) -> &[ToneOscillator] {
        &self.oscillators
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }
}

fn declick_for(config: &SynthConfig, tone: usize) -> f64 {
    if tone < config.declick_split_tone {
        config.declick_low
    } else {
        config.declick_high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::wrap_phase;

    const DIV: usize = 4;
    const TONES: usize = 24;

    fn analyzer_config() -> AnalyzerConfig {
        AnalyzerConfig {
            tone_count: TONES,
            tone_div: DIV,
            base_frequency: 110.0,
            ..Default::default()
        }
    }

    fn synth() -> WaveSynth {
        let config = SynthConfig {
            normalize_output: false,
            output_gain: 1.0,
            parallel: false,
            ..Default::default()
        };
        WaveSynth::new(config, &analyzer_config()).unwrap()
    }

    fn silent_records() -> Vec<PeakRecord> {
        (0..TONES * DIV)
            .map(|i| PeakRecord {
                delta: 110.0 * (i as f64 / 48.0).exp2() / 44_100.0,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn silence_keeps_phase_running() {
        let mut synth = synth();
        let records = silent_records();
        let start: Vec<f64> = synth.oscillators().iter().map(|o| o.phase).collect();

        let mut out = vec![1.0f32; 2 * 441];
        for _ in 0..10 {
            synth.write_records(&records, 1.0, &mut out);
            assert!(out.iter().all(|v| *v == 0.0));
        }

        for (tone, osc) in synth.oscillators().iter().enumerate() {
            let delta = (records[tone * DIV].delta * records[tone * DIV + DIV - 1].delta).sqrt();
            let mut expected = start[tone];
            for _ in 0..10 {
                expected = wrap_phase(expected + delta * 441.0);
            }
            assert!((osc.phase - expected).abs() < 1e-9, "tone {tone}");
        }
    }

    #[test]
    fn reactivation_continues_the_running_phase() {
        let mut synth = synth();
        let silent = silent_records();
        let mut active = silent_records();
        active[10 * DIV + 1].left = 0.5;
        active[10 * DIV + 1].right = 0.5;

        let mut out = vec![0.0f32; 2 * 441];
        synth.write_records(&active, 1.0, &mut out);
        for _ in 0..5 {
            synth.write_records(&silent, 1.0, &mut out);
        }
        assert!(synth.oscillators()[10].is_silent());

        let delta = active[10 * DIV + 1].delta;
        let before = synth.oscillators()[10].phase;
        synth.write_records(&active, 1.0, &mut out);

        // no neighbour sounds, so the own running phase is kept
        let osc = &synth.oscillators()[10];
        assert!((osc.phase - wrap_phase(before + delta * 441.0)).abs() < 1e-9);

        // first rendered sample starts at the running phase
        let first = out[0] as f64;
        let expected = SineTable::new().sample(before) * 0.5 * 0.125;
        assert!((first - expected).abs() < 1e-6, "{first} vs {expected}");
    }

    #[test]
    fn reactivated_group_adopts_neighbour_phase() {
        let mut synth = synth();
        let mut records = silent_records();
        records[10 * DIV].left = 0.5;
        records[10 * DIV].right = 0.5;

        let mut out = vec![0.0f32; 2 * 441];
        synth.write_records(&records, 1.0, &mut out);
        assert!(synth.oscillators()[10].loudness() > 0.0);

        records[12 * DIV + 2].left = 0.25;
        synth.retune(&records, 1.0);
        let donor = synth.oscillators()[10].phase;
        assert_eq!(synth.oscillators()[12].phase, donor);

        // groups out of reach keep their own phase
        let far = synth.oscillators()[20].phase;
        records[20 * DIV].left = 0.25;
        synth.retune(&records, 1.0);
        assert_eq!(synth.oscillators()[20].phase, far);
    }

    #[test]
    fn louder_upper_neighbour_wins() {
        let mut synth = synth();
        let mut records = silent_records();
        records[8 * DIV].left = 0.1;
        records[12 * DIV].left = 0.9;

        let mut out = vec![0.0f32; 2 * 441];
        synth.write_records(&records, 1.0, &mut out);

        records[10 * DIV].left = 0.3;
        synth.retune(&records, 1.0);
        assert_eq!(synth.oscillators()[10].phase, synth.oscillators()[12].phase);
    }

    #[test]
    fn quiet_peaks_are_gated() {
        let mut synth = synth();
        let mut records = silent_records();
        // threshold is 1e-3 of the gain
        records[4 * DIV].left = 0.5e-3;
        records[6 * DIV].left = 2e-3;

        synth.retune(&records, 1.0);
        assert_eq!(synth.oscillators()[4].target, [0.0, 0.0]);
        assert_eq!(synth.oscillators()[6].target, [2e-3, 0.0]);
    }

    #[test]
    fn loudest_bin_sets_frequency_and_pitch_scales_it() {
        let mut synth = synth();
        synth.set_pitch(2.0);
        let mut records = silent_records();
        records[3 * DIV + 1].left = 0.2;
        records[3 * DIV + 3].right = 0.4;

        synth.retune(&records, 1.0);
        let osc = &synth.oscillators()[3];
        assert_eq!(osc.target, [0.2, 0.4]);
        assert!((osc.delta - 2.0 * records[3 * DIV + 3].delta).abs() < 1e-15);
    }

    #[test]
    fn start_phases_are_spread() {
        let synth = synth();
        let phases: Vec<f64> = synth.oscillators().iter().map(|o| o.phase).collect();
        assert_eq!(phases[0], 0.0);
        for (i, a) in phases.iter().enumerate() {
            assert!((0.0..1.0).contains(a));
            for b in &phases[i + 1..] {
                assert!((a - b).abs() > 1e-3);
            }
        }
    }

    #[test]
    fn register_sets_declick() {
        let config = SynthConfig {
            declick_split_tone: 12,
            ..Default::default()
        };
        let synth = WaveSynth::new(config, &analyzer_config()).unwrap();
        assert_eq!(synth.oscillators()[11].declick, 0.125);
        assert_eq!(synth.oscillators()[12].declick, 0.25);
    }
}
