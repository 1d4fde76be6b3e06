use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::StreamFormat;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// device name, `"default"` lets the backend choose
    pub device: String,

    pub format: StreamFormat,

    /// frames per device buffer
    pub buffer_frames: usize,

    /// buffers cycling between worker and device, at least 2
    pub buffer_count: usize,

    /// how long the device may take to confirm an open
    pub open_timeout: Duration,

    /// how long the device may take to confirm a close
    pub close_timeout: Duration,

    /// a running stream without any returned buffer for this long is dead
    ///
    /// at least two buffer durations, a healthy device may hold one buffer for a whole period
    pub stall_timeout: Duration,

    /// worker wakeup interval, also the granularity `stop` polls with
    pub poll_interval: Duration,

    /// `stop` gives up after this many polls
    pub stop_attempts: u32,
}
impl PipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.format.validate()?;
        if self.buffer_frames == 0 {
            return Err(ConfigError::Zero { name: "buffer_frames" });
        }
        if self.buffer_count < 2 {
            return Err(ConfigError::BufferCount(self.buffer_count));
        }
        for (name, value) in [
            ("open_timeout", self.open_timeout),
            ("close_timeout", self.close_timeout),
            ("stall_timeout", self.stall_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Zero { name });
            }
        }
        if self.stop_attempts == 0 {
            return Err(ConfigError::Zero { name: "stop_attempts" });
        }
        let buffer = self.buffer_duration();
        if self.stall_timeout < 2 * buffer {
            return Err(ConfigError::StallTimeout {
                stall: self.stall_timeout,
                buffer,
            });
        }
        Ok(())
    }

    /// interleaved samples per buffer
    pub fn buffer_len(&self) -> usize {
        self.buffer_frames * self.format.channels as usize
    }

    /// playback time of one buffer
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_frames as f64 / self.format.sample_rate.max(1) as f64)
    }
}
impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            device: String::from("default"),
            format: StreamFormat::default(),
            buffer_frames: 441,
            buffer_count: 8,
            open_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(2),
            stall_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            stop_attempts: 100,
        }
    }
}
