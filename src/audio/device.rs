//! boundary to whatever actually moves samples in and out of the machine
//!
//! a device never calls back into the pipeline. Everything it has to say (opened, buffer done,
//! closed, failure) goes through the `Notifier` it was opened with and is picked up by the
//! pipeline's worker thread.

use crossbeam::channel::Sender;

use crate::audio::buffer::AudioBuffer;
use crate::config::StreamFormat;
use crate::error::{DeviceError, DeviceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// device plays submitted buffers
    Output,

    /// device fills submitted buffers
    Input,
}

#[derive(Debug)]
pub enum DeviceEvent {
    Opened,

    /// played or recorded, the buffer belongs to the pipeline again
    Done(AudioBuffer),

    Closed,

    Error(DeviceError),
}

/// sending half of a device's notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<DeviceEvent>,
}
impl Notifier {
    pub fn new(sender: Sender<DeviceEvent>) -> Self {
        Self { sender }
    }

    /// false once the pipeline stopped listening, the event is dropped then
    pub fn notify(&self, event: DeviceEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn opened(&self) -> bool {
        self.notify(DeviceEvent::Opened)
    }

    pub fn done(&self, buffer: AudioBuffer) -> bool {
        self.notify(DeviceEvent::Done(buffer))
    }

    pub fn closed(&self) -> bool {
        self.notify(DeviceEvent::Closed)
    }

    pub fn error(&self, error: DeviceError) -> bool {
        self.notify(DeviceEvent::Error(error))
    }
}

/// an audio endpoint driven by one pipeline worker
///
/// all methods are called from the worker thread only. `open` and `close` may return before the
/// device is ready or gone, confirmation comes as `DeviceEvent::Opened` / `DeviceEvent::Closed`.
pub trait AudioDevice: Send + 'static {
    fn open(
        &mut self,
        device: &str,
        direction: Direction,
        format: StreamFormat,
        notifier: Notifier,
    ) -> DeviceResult<()>;

    /// queues a buffer, it comes back as `DeviceEvent::Done`
    fn submit(&mut self, buffer: AudioBuffer) -> DeviceResult<()>;

    /// stops the device and returns every queued buffer as `DeviceEvent::Done`
    fn reset(&mut self) -> DeviceResult<()>;

    /// releases the device, confirmed with `DeviceEvent::Closed`
    fn close(&mut self) -> DeviceResult<()>;
}
