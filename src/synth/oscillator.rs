use std::f64::consts::TAU;

use crate::utils::wrap_phase;

/// entries of one sine period
pub const TABLE_SIZE: usize = 192;

/// quantized sine with a guard entry so interpolation never wraps the index
#[derive(Debug, Clone)]
pub struct SineTable {
    table: Vec<f64>,
}
impl SineTable {
    pub fn new() -> Self {
        let mut table: Vec<f64> = (0..TABLE_SIZE)
            .map(|i| (TAU * i as f64 / TABLE_SIZE as f64).sin())
            .collect();
        table.push(table[0]);
        Self { table }
    }

    /// linearly interpolated sine of `phase` in cycles, `phase` must be in [0, 1)
    #[inline]
    pub fn sample(&self, phase: f64) -> f64 {
        let pos = phase * TABLE_SIZE as f64;
        let index = (pos as usize).min(TABLE_SIZE - 1);
        let frac = pos - index as f64;
        let a = self.table[index];
        a + (self.table[index + 1] - a) * frac
    }
}
impl Default for SineTable {
    fn default() -> Self {
        Self::new()
    }
}

/// one sine per tone group
#[derive(Debug, Clone, Default)]
pub struct ToneOscillator {
    /// cycles, always in [0, 1)
    pub phase: f64,

    /// phase increment per sample
    pub delta: f64,

    /// declicked amplitude, `[left, right]`
    pub amplitude: [f64; 2],

    pub target: [f64; 2],

    /// smoothing coefficient per sample
    pub declick: f64,
}
impl ToneOscillator {
    pub fn new(phase: f64, declick: f64) -> Self {
        Self {
            phase: wrap_phase(phase),
            declick,
            ..Default::default()
        }
    }

    /// nothing to hear now and nothing fading out
    pub fn is_silent(&self) -> bool {
        self.target == [0.0, 0.0] && self.amplitude == [0.0, 0.0]
    }

    pub fn loudness(&self) -> f64 {
        self.amplitude[0].max(self.amplitude[1])
    }

    /// advances the phase without producing sound
    pub fn skip(&mut self, frames: usize) {
        self.phase = wrap_phase(self.phase + self.delta * frames as f64);
    }

    /// adds this oscillator into an interleaved buffer
    ///
    /// smoothed amplitudes of silenced channels that fall below `floor` snap to zero afterwards
    pub fn render(&mut self, table: &SineTable, out: &mut [f32], channels: usize, floor: f64) {
        let frames = out.len() / channels.max(1);
        if self.is_silent() {
            self.skip(frames);
            return;
        }

        let k = self.declick;
        let [target_l, target_r] = self.target;
        let [mut amp_l, mut amp_r] = self.amplitude;
        let mut phase = self.phase;

        for frame in out.chunks_exact_mut(channels.max(1)) {
            let s = table.sample(phase);
            phase = wrap_phase(phase + self.delta);
            amp_l += (target_l - amp_l) * k;
            amp_r += (target_r - amp_r) * k;

            match frame {
                [mono] => *mono += (s * (amp_l + amp_r) * 0.5) as f32,
                [l, r, ..] => {
                    *l += (s * amp_l) as f32;
                    *r += (s * amp_r) as f32;
                }
                [] => {}
            }
        }

        if target_l == 0.0 && amp_l < floor {
            amp_l = 0.0;
        }
        if target_r == 0.0 && amp_r < floor {
            amp_r = 0.0;
        }
        self.amplitude = [amp_l, amp_r];
        self.phase = phase;
    }
}
