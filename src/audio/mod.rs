pub mod buffer;
pub mod config;
pub mod converter;
pub mod device;
pub mod session;
pub mod virtual_device;

/// real devices through cpal
#[cfg(feature = "cpal")]
pub mod cpal_backend;

#[cfg(test)]
mod unittest;

pub use buffer::{AudioBuffer, BufferPool};
pub use config::PipelineConfig;
pub use device::{AudioDevice, DeviceEvent, Direction, Notifier};
pub use session::{AudioInput, AudioOutput, Capture, Pipeline, Render, StreamState};
pub use virtual_device::VirtualDevice;
