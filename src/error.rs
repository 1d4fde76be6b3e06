//! error types of every layer

use std::time::Duration;

use thiserror::Error;

/// invalid parameters, rejected before any state is built
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive, got {0}")]
    SampleRate(u32),

    #[error("only mono and stereo are supported, got {0} channels")]
    Channels(u16),

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("{name} must be finite and positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must lie in {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("low region boundary ({low} Hz) must be below mid region boundary ({mid} Hz)")]
    RegionOrder { low: f64, mid: f64 },

    #[error("at least 2 buffers are needed, got {0}")]
    BufferCount(usize),

    #[error("stall timeout {stall:?} must be longer than one buffer ({buffer:?})")]
    StallTimeout { stall: Duration, buffer: Duration },

    #[error("format mismatch: {0}")]
    Mismatch(String),
}

/// failures reported by or about the external audio device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("audio device not found: {0}")]
    NotFound(String),

    #[error("failed to open audio device: {0}")]
    Open(String),

    #[error("audio device did not confirm open within {0:?}")]
    OpenTimeout(Duration),

    #[error("failed to submit buffer: {0}")]
    Submit(String),

    #[error("failed to reset audio device: {0}")]
    Reset(String),

    #[error("failed to close audio device: {0}")]
    Close(String),

    #[error("audio device did not confirm close within {0:?}")]
    CloseTimeout(Duration),

    /// expected buffer notification never arrived
    #[error("audio device stalled, no buffer returned for {waited:?}")]
    Stall { waited: Duration },

    #[error("audio device notification channel disconnected")]
    Disconnected,

    #[error("audio backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    pub fn is_stall(&self) -> bool {
        matches!(self, DeviceError::Stall { .. })
    }
}

/// errors surfaced by `AudioOutput` / `AudioInput`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("audio worker thread panicked")]
    WorkerPanicked,

    /// the worker is stuck inside the device, it has been told to close once it returns
    #[error("audio worker did not report within {0:?}")]
    Unresponsive(Duration),
}

/// errors of the file reader collaborator
#[derive(Error, Debug)]
pub enum SourceError {
    #[cfg(feature = "wav")]
    #[error("failed to decode wav: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported sample format: {0}")]
    Unsupported(String),

    #[error("clip contains no samples")]
    Empty,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type SourceResult<T> = Result<T, SourceError>;
