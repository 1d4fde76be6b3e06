#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::utils::one_pole_coefficient;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GainMode {
    /// follows the loudest bin, fast upwards and slow downwards
    Auto,

    /// gain is the loudest bin of the current block
    Normalize,

    Fixed(f64),
}

/// tracks the loudest bin of the bank
#[derive(Debug, Clone)]
pub struct AutoGain {
    gain: f64,
    max: f64,
    floor: f64,

    /// seconds
    attack: f64,
    release: f64,
    sample_rate: f64,
}
impl AutoGain {
    pub fn new(floor: f64, attack: f64, release: f64, sample_rate: u32) -> Self {
        Self {
            gain: floor,
            max: 0.0,
            floor,
            attack,
            release,
            sample_rate: sample_rate as f64,
        }
    }

    /// moves the gain towards `current_max` after a block of `frames` frames
    pub fn update(&mut self, current_max: f64, frames: usize, mode: GainMode) -> f64 {
        let target = if current_max.is_finite() {
            current_max.max(self.floor)
        } else {
            self.floor
        };
        self.max = target;

        self.gain = match mode {
            GainMode::Normalize => target,
            GainMode::Fixed(gain) => gain,
            GainMode::Auto => {
                let tau = if target > self.gain { self.attack } else { self.release };
                let k = one_pole_coefficient(frames as f64 / self.sample_rate, tau);
                self.gain + (target - self.gain) * k
            }
        }
        .max(self.floor);

        self.gain
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// floored maximum seen in the last block
    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn reset(&mut self) {
        self.gain = self.floor;
        self.max = 0.0;
    }
}
