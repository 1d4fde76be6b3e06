//! general numeric utilities shared by the filter bank, the peak extractor and the oscillator bank

/// lowest frequency ever fed into a logarithm
pub const MIN_FREQUENCY: f64 = 1e-3;

/// values below this are flushed to zero between blocks so that silent bands never go denormal
pub const DENORMAL_LIMIT: f64 = 1e-30;

/// frequency of a (fractional) bin index on a logarithmic axis
///
/// `oct_div` is the number of bins per octave
pub fn bin_frequency(base_frequency: f64, index: f64, oct_div: f64) -> f64 {
    base_frequency * (index / oct_div).exp2()
}

/// inverse of `bin_frequency`, returns a fractional bin index
pub fn bin_position(base_frequency: f64, frequency: f64, oct_div: f64) -> f64 {
    let frequency = frequency.max(MIN_FREQUENCY);
    let base_frequency = base_frequency.max(MIN_FREQUENCY);
    oct_div * (frequency / base_frequency).log2()
}

/// highest centre frequency a bandpass may use
pub fn nyquist_limit(sample_rate: f64) -> f64 {
    sample_rate * (0.5 - 1e-2)
}

/// keeps a centre frequency strictly below nyquist
pub fn clamp_to_nyquist(frequency: f64, sample_rate: f64) -> f64 {
    frequency.clamp(MIN_FREQUENCY, nyquist_limit(sample_rate))
}

/// coefficient of a one-pole smoother that covers `1 - 1/e` of a step within `time_constant`
///
/// `elapsed` and `time_constant` share the same unit
pub fn one_pole_coefficient(elapsed: f64, time_constant: f64) -> f64 {
    if time_constant <= 0.0 {
        return 1.0;
    }
    1.0 - (-elapsed / time_constant).exp()
}

#[inline]
pub fn flush_denormal(value: f64) -> f64 {
    if value.abs() < DENORMAL_LIMIT {
        0.0
    } else {
        value
    }
}

/// wraps a phase into [0, 1)
#[inline]
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase - phase.floor();
    // -1e-20 - floor(-1e-20) rounds to exactly 1.0
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// copies interleaved frames between different channel layouts
///
/// mono to stereo duplicates, stereo to mono averages, anything else copies
/// the first `dst_channels` channels. Returns the number of frames copied.
pub fn map_channels(src: &[f32], src_channels: usize, dst: &mut [f32], dst_channels: usize) -> usize {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let frames = (src.len() / src_channels).min(dst.len() / dst_channels);

    for (src_frame, dst_frame) in src
        .chunks_exact(src_channels)
        .zip(dst.chunks_exact_mut(dst_channels))
        .take(frames)
    {
        match (src_channels, dst_channels) {
            (1, _) => dst_frame.iter_mut().for_each(|v| *v = src_frame[0]),
            (_, 1) => dst_frame[0] = src_frame.iter().sum::<f32>() / src_channels as f32,
            _ => {
                for (i, v) in dst_frame.iter_mut().enumerate() {
                    *v = src_frame.get(i).copied().unwrap_or(0.0);
                }
            }
        }
    }

    frames
}
