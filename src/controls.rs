//! runtime knobs shared between the control thread and the audio worker
//!
//! writes never block the worker. Values are read once at the start of every analysis block,
//! so a change shows up at most one block late.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::spectrum::config::positive;
use crate::spectrum::PeakTuning;

/// what the output plays while the file is analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PlaybackMode {
    /// the oscillator bank
    #[default]
    Resynthesis,

    /// the file itself
    Original,
}
impl PlaybackMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackMode::Original,
            _ => PlaybackMode::Resynthesis,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlaybackMode::Resynthesis => 0,
            PlaybackMode::Original => 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    pitch: AtomicU64,
    speed: AtomicU64,
    auto_gain: AtomicBool,
    normalize: AtomicBool,
    mode: AtomicU8,
    tuning: Mutex<Option<(PeakTuning, PeakTuning)>>,
}

/// cheap to clone, every clone sees the same values
#[derive(Debug, Clone)]
pub struct Controls {
    inner: Arc<Inner>,
}
impl Controls {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pitch: AtomicU64::new(1.0f64.to_bits()),
                speed: AtomicU64::new(1.0f64.to_bits()),
                auto_gain: AtomicBool::new(true),
                normalize: AtomicBool::new(false),
                mode: AtomicU8::new(PlaybackMode::default().as_u8()),
                tuning: Mutex::new(None),
            }),
        }
    }

    pub fn pitch(&self) -> f64 {
        f64::from_bits(self.inner.pitch.load(Ordering::Relaxed))
    }

    /// frequency factor of the resynthesis, 1.0 keeps the analysed pitch
    pub fn set_pitch(&self, pitch: f64) -> ConfigResult<()> {
        positive("pitch", pitch)?;
        debug!("pitch set to {pitch}");
        self.inner.pitch.store(pitch.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.inner.speed.load(Ordering::Relaxed))
    }

    /// playback speed of the file, pitch and tempo change together
    pub fn set_speed(&self, speed: f64) -> ConfigResult<()> {
        positive("speed", speed)?;
        debug!("speed set to {speed}");
        self.inner.speed.store(speed.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn auto_gain(&self) -> bool {
        self.inner.auto_gain.load(Ordering::Relaxed)
    }

    pub fn set_auto_gain(&self, enabled: bool) {
        self.inner.auto_gain.store(enabled, Ordering::Relaxed);
    }

    pub fn normalize(&self) -> bool {
        self.inner.normalize.load(Ordering::Relaxed)
    }

    pub fn set_normalize(&self, enabled: bool) {
        self.inner.normalize.store(enabled, Ordering::Relaxed);
    }

    pub fn mode(&self) -> PlaybackMode {
        PlaybackMode::from_u8(self.inner.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: PlaybackMode) {
        debug!("playback mode set to {mode:?}");
        self.inner.mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// queues new threshold tunings, applied by the worker on its next block
    ///
    /// a later call before the worker picked the tunings up replaces them
    pub fn set_tuning(&self, display: PeakTuning, synthesis: PeakTuning) -> ConfigResult<()> {
        display.validate()?;
        synthesis.validate()?;
        *self.inner.tuning.lock().unwrap_or_else(|e| e.into_inner()) = Some((display, synthesis));
        Ok(())
    }

    /// pending tunings, each pair is handed out once
    pub fn take_tuning(&self) -> Option<(PeakTuning, PeakTuning)> {
        self.inner.tuning.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}
