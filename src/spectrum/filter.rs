//! constant-Q bank of biquad bandpass filters followed by a leaky power integrator
//!
//! every band owns its own state, so bands can be processed in any order or in parallel

use std::f64::consts::{LN_2, PI};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::spectrum::config::AnalyzerConfig;
use log::warn;

use crate::utils::{
    bin_frequency, clamp_to_nyquist, flush_denormal, nyquist_limit, one_pole_coefficient, MIN_FREQUENCY,
};

/// bandwidth in semitones for a centre frequency
///
/// widens by `per_octave` semitones for each octave below `reference`, never narrower than `min`
pub fn bandwidth_semitones(frequency: f64, reference: f64, per_octave: f64, min: f64) -> f64 {
    let frequency = frequency.max(MIN_FREQUENCY);
    (1.0 + (reference / frequency).log2() * per_octave).max(min)
}

/// bandpass coefficients with 0 dB peak gain, `(kb0, ka1, ka2)`
///
/// the filter runs as `y = kb0 * (x - x2) + ka1 * y1 + ka2 * y2`
pub fn bandpass_coefficients(frequency: f64, bandwidth: f64, sample_rate: f64) -> (f64, f64, f64) {
    let omega = 2.0 * PI * frequency / sample_rate;
    let sn = omega.sin();
    let cs = omega.cos();
    let octaves = bandwidth / 12.0;
    let alpha = sn * (LN_2 / 2.0 * octaves * omega / sn).sinh();
    let a0 = 1.0 + alpha;

    (alpha / a0, 2.0 * cs / a0, -(1.0 - alpha) / a0)
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
    power: f64,
    display_power: f64,
}

#[derive(Debug, Clone)]
pub struct FilterBand {
    /// centre frequency in Hz
    pub frequency: f64,

    /// semitones
    pub bandwidth: f64,

    kb0: f64,
    ka1: f64,
    ka2: f64,

    /// power integrator coefficient
    sigma: f64,

    /// slower integrator behind the display curve
    display_sigma: f64,

    state: [ChannelState; 2],
}
impl FilterBand {
    pub fn new(frequency: f64, config: &AnalyzerConfig) -> Self {
        let sample_rate = config.sample_rate as f64;
        let frequency = clamp_to_nyquist(frequency, sample_rate);
        let bandwidth = bandwidth_semitones(
            frequency,
            config.bandwidth_reference,
            config.bandwidth_per_octave,
            config.min_bandwidth,
        );
        let (kb0, ka1, ka2) = bandpass_coefficients(frequency, bandwidth, sample_rate);
        let rate = config.response * frequency;

        Self {
            frequency,
            bandwidth,
            kb0,
            ka1,
            ka2,
            sigma: one_pole_coefficient(rate, sample_rate),
            display_sigma: one_pole_coefficient(config.display_response.min(rate), sample_rate),
            state: [ChannelState::default(); 2],
        }
    }

    /// runs an interleaved block through the filter
    ///
    /// a mono block is mirrored into the right channel
    pub fn process(&mut self, samples: &[f32], channels: usize) {
        let (kb0, ka1, ka2, sigma) = (self.kb0, self.ka1, self.ka2, self.sigma);
        let display_sigma = self.display_sigma;
        let channels = channels.clamp(1, 2);

        for (ch, state) in self.state.iter_mut().enumerate().take(channels) {
            let mut s = *state;
            for frame in samples.chunks_exact(channels) {
                let x = frame[ch] as f64;
                let y = kb0 * (x - s.x2) + ka1 * s.y1 + ka2 * s.y2;
                s.x2 = s.x1;
                s.x1 = x;
                s.y2 = s.y1;
                s.y1 = y;
                s.power += (y * y - s.power) * sigma;
                s.display_power += (y * y - s.display_power) * display_sigma;
            }

            s.x1 = flush_denormal(s.x1);
            s.x2 = flush_denormal(s.x2);
            s.y1 = flush_denormal(s.y1);
            s.y2 = flush_denormal(s.y2);
            s.power = flush_denormal(s.power).max(0.0);
            s.display_power = flush_denormal(s.display_power).max(0.0);
            *state = s;
        }

        if channels == 1 {
            self.state[1] = self.state[0];
        }
    }

    /// smoothed power per channel, `[left, right]`
    pub fn power(&self) -> [f64; 2] {
        [self.state[0].power, self.state[1].power]
    }

    /// power through the display integrator, `[left, right]`
    ///
    /// never reacts faster than `power`
    pub fn display_power(&self) -> [f64; 2] {
        [self.state[0].display_power, self.state[1].display_power]
    }

    /// amplitude of a sine that would produce the current power, per channel
    pub fn amplitude(&self) -> [f64; 2] {
        let [l, r] = self.power();
        [(2.0 * l).sqrt(), (2.0 * r).sqrt()]
    }

    pub fn reset(&mut self) {
        self.state = [ChannelState::default(); 2];
    }
}

/// all bands of the analyzer, log spaced from `base_frequency` upwards
#[derive(Debug, Clone)]
pub struct FilterBank {
    bands: Vec<FilterBand>,
    channels: usize,

    /// bins whose centre was pulled down below nyquist
    clamped: usize,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    parallel: bool,
}
impl FilterBank {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let oct_div = config.oct_div();
        let limit = nyquist_limit(config.sample_rate as f64);
        let frequencies: Vec<f64> = (0..config.bank_count())
            .map(|i| bin_frequency(config.base_frequency, i as f64, oct_div))
            .collect();

        let clamped = frequencies.iter().filter(|f| **f > limit).count();
        if clamped > 0 {
            warn!(
                "{clamped} of {} bins lie above {limit:.0} Hz at {} Hz and share that centre",
                frequencies.len(),
                config.sample_rate
            );
        }

        let bands = frequencies.into_iter().map(|f| FilterBand::new(f, config)).collect();

        Self {
            bands,
            channels: config.channels as usize,
            clamped,
            parallel: config.parallel,
        }
    }

    pub fn process(&mut self, samples: &[f32]) {
        let channels = self.channels;

        #[cfg(feature = "parallel")]
        if self.parallel {
            self.bands
                .par_iter_mut()
                .for_each(|band| band.process(samples, channels));
            return;
        }

        for band in self.bands.iter_mut() {
            band.process(samples, channels);
        }
    }

    pub fn bands(&self) -> &[FilterBand] {
        &self.bands
    }

    /// number of top bins that sit on the nyquist limit instead of their own frequency
    pub fn clamped(&self) -> usize {
        self.clamped
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn reset(&mut self) {
        self.bands.iter_mut().for_each(FilterBand::reset);
    }
}
