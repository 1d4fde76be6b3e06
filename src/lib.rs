//! cqsynth splits audio into a constant-Q bank of bandpass filters, picks the spectral peaks and
//! plays them back through a bank of sine oscillators
//!
//! The analysis runs sample by sample, so the resolution in time does not depend on a window
//! size like it would with an FFT. Each semitone is divided into `tone_div` bins, every
//! semitone group drives one oscillator.
//!
//! Audio I/O goes through the `audio` module: a double buffered pipeline that talks to any
//! `AudioDevice`, cpal behind the `cpal` feature or a `VirtualDevice` for headless runs.
//!
//!# Code Example with file playback
//!```rs
//!use cqsynth::audio::{AudioOutput, cpal_backend::CpalDevice};
//!use cqsynth::config::Config;
//!use cqsynth::controls::PlaybackMode;
//!use cqsynth::player::{Player, DEFAULT_BLOCK_FRAMES};
//!use cqsynth::source::Clip;
//!
//!fn main() {
//!    let config = Config::default();
//!    let clip = Clip::open("song.wav").unwrap();
//!
//!    // analyses the file and plays the resynthesis
//!    let player = Player::new(clip, &config, DEFAULT_BLOCK_FRAMES).unwrap();
//!    let controls = player.controls().clone();
//!    let snapshots = player.snapshots().clone();
//!
//!    let mut output = AudioOutput::new(CpalDevice::new(), player, config.pipeline).unwrap();
//!    output.open().unwrap();
//!
//!    controls.set_mode(PlaybackMode::Original);
//!
//!    while !output.take_ended() {
//!        if let Some(snapshot) = snapshots.take() {
//!            /*
//!            draw snapshot.curve, snapshot.threshold and snapshot.peaks ...
//!            */
//!        }
//!    }
//!    output.close().unwrap();
//!}
//!```

/// constant-Q filter bank, auto gain and peak extraction
pub mod spectrum;

/// additive resynthesis from spectral peaks
pub mod synth;

/// double buffered audio I/O
pub mod audio;

/// decoded files and playback position
pub mod source;

/// output renderer and input monitor built from the analysis
pub mod player;

pub mod controls;
pub mod config;
pub mod error;
pub mod utils;
