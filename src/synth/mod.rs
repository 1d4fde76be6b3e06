pub mod bank;
pub mod config;
pub mod oscillator;

pub use bank::WaveSynth;
pub use config::SynthConfig;
