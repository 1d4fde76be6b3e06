//! adaptive local threshold and run-length peak picking
//!
//! the threshold of a bin is the average power of its neighbourhood, the neighbourhood being
//! wider and the required margin larger at low frequencies where partials are denser

use splines::{Interpolation, Key, Spline};

use crate::spectrum::config::PeakTuning;
use crate::utils::bin_position;

/// per bin window radius and gain of the local threshold, precomputed from a `PeakTuning`
#[derive(Debug, Clone)]
pub struct ThresholdShape {
    radius: Vec<usize>,
    gain: Vec<f64>,
}
impl ThresholdShape {
    /// `base_frequency` and `tone_div` describe the bin grid of the bank
    ///
    /// `transpose` in semitones moves every bin the other way across the regions: at -12 the
    /// low and mid boundaries sit an octave higher in the bank
    pub fn new(
        tuning: &PeakTuning,
        base_frequency: f64,
        tone_div: usize,
        bank_count: usize,
        transpose: f64,
    ) -> Self {
        let oct_div = (tone_div * 12) as f64;
        let shift = transpose * tone_div as f64;
        let low = bin_position(base_frequency, tuning.low_frequency, oct_div);
        let mid = bin_position(base_frequency, tuning.mid_frequency, oct_div);

        let width = region_spline(low, mid, tuning.low_width, tuning.mid_width);
        let gain = region_spline(low, mid, tuning.low_gain, tuning.mid_gain);

        let (radius, gain) = (0..bank_count)
            .map(|i| {
                let pos = i as f64 + shift;
                let semitones = width.clamped_sample(pos).unwrap_or(tuning.mid_width);
                let radius = (semitones * tone_div as f64).round().max(0.0) as usize;
                (radius, gain.clamped_sample(pos).unwrap_or(tuning.mid_gain))
            })
            .unzip();

        Self { radius, gain }
    }

    pub fn radius(&self, bin: usize) -> usize {
        self.radius[bin]
    }

    pub fn gain(&self, bin: usize) -> f64 {
        self.gain[bin]
    }

    pub fn len(&self) -> usize {
        self.radius.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radius.is_empty()
    }
}

fn region_spline(low: f64, mid: f64, low_value: f64, mid_value: f64) -> Spline<f64, f64> {
    Spline::from_vec(vec![
        Key::new(low, low_value, Interpolation::Linear),
        Key::new(mid, mid_value, Interpolation::Linear),
    ])
}

/// writes the amplitude threshold of every bin into `threshold`
///
/// `threshold[i] = gain(i) * sqrt(2 * mean(power[i - r ..= i + r])) / scale`, the window is cut
/// at both ends of the bank. `prefix` is scratch space, kept by the caller between blocks
pub fn local_threshold(
    power: &[f64],
    shape: &ThresholdShape,
    scale: f64,
    prefix: &mut Vec<f64>,
    threshold: &mut [f64],
) {
    // running sum, prefix[i] is the sum of power[..i]
    prefix.clear();
    prefix.push(0.0);
    let mut sum = 0.0;
    for p in power {
        sum += *p;
        prefix.push(sum);
    }

    let last = power.len().saturating_sub(1);
    for (i, th) in threshold.iter_mut().enumerate().take(power.len()) {
        let r = shape.radius(i);
        let start = i.saturating_sub(r);
        let end = (i + r).min(last);
        let mean = ((prefix[end + 1] - prefix[start]) / (end + 1 - start) as f64).max(0.0);
        *th = shape.gain(i) * (2.0 * mean).sqrt() / scale;
    }
}

/// emits the maximum of every contiguous run of bins at or above their threshold
///
/// a bin exactly at its threshold belongs to the run, only a bin below it ends one. All other
/// bins of `peaks` are zeroed, returns the number of emitted peaks
pub fn pick_peaks(values: &[f64], threshold: &[f64], peaks: &mut [f64]) -> usize {
    let mut count = 0;
    let mut best = 0.0;
    let mut best_index: Option<usize> = None;

    let mut commit = |peaks: &mut [f64], best: f64, index: Option<usize>| {
        if let Some(index) = index {
            peaks[index] = best;
            count += 1;
        }
    };

    for (i, (&value, &th)) in values.iter().zip(threshold).enumerate() {
        peaks[i] = 0.0;
        let mut value = value;
        if value < th {
            commit(peaks, best, best_index);
            value = 0.0;
            best = 0.0;
            best_index = None;
        }
        if best < value {
            best = value;
            best_index = Some(i);
        }
    }
    commit(peaks, best, best_index);

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_shape(len: usize, radius: usize, gain: f64) -> ThresholdShape {
        ThresholdShape {
            radius: vec![radius; len],
            gain: vec![gain; len],
        }
    }

    #[test]
    fn spikes_separated_by_valley_give_two_peaks() {
        let values = [0.0, 0.0, 5.0, 0.0, 0.0, 3.0, 0.0, 0.0];
        let threshold = [1.0; 8];
        let mut peaks = [9.0; 8];

        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 2);
        assert_eq!(peaks, [0.0, 0.0, 5.0, 0.0, 0.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn adjacent_spikes_give_one_peak() {
        let values = [0.0, 0.0, 3.0, 5.0, 2.0, 0.0];
        let threshold = [1.0; 6];
        let mut peaks = [0.0; 6];

        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 1);
        assert_eq!(peaks, [0.0, 0.0, 0.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn run_reaching_the_end_is_committed() {
        let values = [0.0, 2.0, 4.0];
        let threshold = [1.0; 3];
        let mut peaks = [0.0; 3];

        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 1);
        assert_eq!(peaks, [0.0, 0.0, 4.0]);
    }

    #[test]
    fn bin_at_threshold_extends_the_run() {
        let values = [0.0, 3.0, 1.0, 4.0, 0.0];
        let threshold = [1.0; 5];
        let mut peaks = [0.0; 5];

        // bin 2 equals its threshold, so bins 1 to 3 are a single run
        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 1);
        assert_eq!(peaks, [0.0, 0.0, 0.0, 4.0, 0.0]);

        let values = [0.0, 3.0, 0.999, 4.0, 0.0];
        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 2);
        assert_eq!(peaks, [0.0, 3.0, 0.0, 4.0, 0.0]);
    }

    #[test]
    fn nothing_above_threshold_gives_nothing() {
        let values = [0.5; 5];
        let threshold = [1.0; 5];
        let mut peaks = [1.0; 5];

        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 0);
        assert!(peaks.iter().all(|p| *p == 0.0));
    }

    #[test]
    fn threshold_averages_clamped_window() {
        let power = [2.0, 0.0, 0.0, 0.0, 8.0];
        let shape = flat_shape(5, 1, 1.0);
        let mut threshold = [0.0; 5];
        local_threshold(&power, &shape, 1.0, &mut Vec::new(), &mut threshold);

        // bin 0 averages bins 0 and 1
        assert!((threshold[0] - (2.0 * 1.0_f64).sqrt()).abs() < 1e-12);
        assert_eq!(threshold[2], 0.0);
        // bin 4 averages bins 3 and 4
        assert!((threshold[4] - (2.0 * 4.0_f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn threshold_is_scaled_after_the_root() {
        let power = [8.0; 4];
        let shape = flat_shape(4, 1, 1.5);
        let mut threshold = [0.0; 4];
        local_threshold(&power, &shape, 2.0, &mut Vec::new(), &mut threshold);

        // 1.5 * sqrt(2 * 8) / 2, not 1.5 * sqrt(2 * 8 / 2)
        assert!(threshold.iter().all(|th| (th - 3.0).abs() < 1e-12), "{threshold:?}");
    }

    #[test]
    fn prefix_scratch_is_reused() {
        let shape = flat_shape(64, 3, 1.0);
        let mut prefix = Vec::new();
        let mut first = vec![0.0; 64];
        let power: Vec<f64> = (0..64).map(|i| (i % 7) as f64).collect();
        local_threshold(&power, &shape, 1.0, &mut prefix, &mut first);

        let (ptr, capacity) = (prefix.as_ptr(), prefix.capacity());
        let mut second = vec![0.0; 64];
        local_threshold(&power, &shape, 1.0, &mut prefix, &mut second);

        assert_eq!(first, second);
        assert_eq!(prefix.len(), 65);
        assert_eq!((prefix.as_ptr(), prefix.capacity()), (ptr, capacity));
    }

    #[test]
    fn isolated_sine_beats_its_threshold() {
        // a single bin of a sine among silence is always above the local mean
        let mut power = vec![0.0; 32];
        power[16] = 0.125;
        let shape = flat_shape(32, 2, 1.1);
        let mut threshold = vec![0.0; 32];
        local_threshold(&power, &shape, 1.0, &mut Vec::new(), &mut threshold);

        let values: Vec<f64> = power.iter().map(|p| (2.0 * p).sqrt()).collect();
        let mut peaks = vec![0.0; 32];
        assert_eq!(pick_peaks(&values, &threshold, &mut peaks), 1);
        assert!((peaks[16] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn shape_interpolates_between_regions() {
        let tuning = PeakTuning {
            low_frequency: 100.0,
            low_width: 4.0,
            low_gain: 2.0,
            mid_frequency: 400.0,
            mid_width: 1.0,
            mid_gain: 1.0,
        };
        // one bin per semitone starting at 100 Hz
        let shape = ThresholdShape::new(&tuning, 100.0, 1, 48, 0.0);

        assert_eq!(shape.radius(0), 4);
        assert_eq!(shape.radius(24), 1);
        assert_eq!(shape.radius(47), 1);
        assert!((shape.gain(12) - 1.5).abs() < 1e-9);
        assert!(shape.gain(0) > shape.gain(12));
        assert!((shape.gain(40) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn transpose_moves_region_boundaries() {
        let tuning = PeakTuning {
            low_frequency: 100.0,
            low_width: 4.0,
            low_gain: 2.0,
            mid_frequency: 400.0,
            mid_width: 1.0,
            mid_gain: 1.0,
        };
        // two bins per semitone, low boundary on bin 0, mid boundary on bin 48
        let plain = ThresholdShape::new(&tuning, 100.0, 2, 120, 0.0);
        // playing twice as fast, the content sits an octave higher
        let semitones = -12.0 * 2.0_f64.log2();
        let shifted = ThresholdShape::new(&tuning, 100.0, 2, 120, semitones);

        // -12 semitones at two bins each moves everything up by 24 bins
        for bin in 0..96 {
            assert_eq!(shifted.radius(bin + 24), plain.radius(bin), "bin {bin}");
            assert!((shifted.gain(bin + 24) - plain.gain(bin)).abs() < 1e-9, "bin {bin}");
        }
        assert_eq!(plain.radius(48), 2);
        assert_eq!(shifted.radius(72), 2);
        assert_eq!(shifted.radius(24), 8);
        assert!((shifted.gain(48) - 1.5).abs() < 1e-9);
    }
}
