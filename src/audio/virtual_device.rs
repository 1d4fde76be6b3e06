//! software device for headless runs
//!
//! an output "plays" buffers by handing a copy to an optional tap, an input records whatever
//! its generator writes. Either paced in real time or as fast as the pipeline keeps up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use log::{debug, warn};

use crate::audio::buffer::AudioBuffer;
use crate::audio::device::{AudioDevice, Direction, Notifier};
use crate::config::StreamFormat;
use crate::error::{DeviceError, DeviceResult};

/// fills a recorded buffer
pub type Generator = Box<dyn FnMut(&mut [f32]) + Send>;

enum Command {
    Buffer(AudioBuffer),
    Reset,
    Close,
}

struct Running {
    commands: Sender<Command>,
    flushing: Arc<AtomicBool>,
    thread: JoinHandle<Option<Generator>>,
}

pub struct VirtualDevice {
    realtime: bool,
    generator: Option<Generator>,
    tap: Option<Sender<Vec<f32>>>,
    running: Option<Running>,
}
impl VirtualDevice {
    /// plays or records one buffer per buffer duration
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            generator: None,
            tap: None,
            running: None,
        }
    }

    /// returns buffers as soon as they are submitted
    pub fn unpaced() -> Self {
        Self {
            realtime: false,
            ..Self::realtime()
        }
    }

    /// every played buffer is copied into `tap`
    pub fn with_tap(mut self, tap: Sender<Vec<f32>>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// input buffers are filled by `generator`, silence without one
    pub fn with_generator(mut self, generator: impl FnMut(&mut [f32]) + Send + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }
}

impl AudioDevice for VirtualDevice {
    fn open(
        &mut self,
        device: &str,
        direction: Direction,
        format: StreamFormat,
        notifier: Notifier,
    ) -> DeviceResult<()> {
        if self.running.is_some() {
            return Err(DeviceError::Open(format!("virtual device `{device}` is already open")));
        }

        let (commands, queue) = channel::unbounded();
        let flushing = Arc::new(AtomicBool::new(false));
        let realtime = self.realtime;
        let tap = self.tap.clone();
        let mut generator = self.generator.take();
        let thread_flushing = flushing.clone();

        let thread = thread::Builder::new()
            .name(String::from("cqsynth-virtual-device"))
            .spawn(move || {
                notifier.opened();
                let frame_time = Duration::from_secs_f64(1.0 / format.sample_rate.max(1) as f64);
                let channels = format.channels.max(1) as u32;

                for command in queue.iter() {
                    match command {
                        Command::Buffer(mut buffer) => {
                            if !thread_flushing.load(Ordering::SeqCst) {
                                if realtime {
                                    thread::sleep(frame_time * (buffer.len() as u32 / channels));
                                }
                                match direction {
                                    Direction::Output => {
                                        if let Some(tap) = &tap {
                                            let _ = tap.send(buffer.as_slice().to_vec());
                                        }
                                    }
                                    Direction::Input => match generator.as_mut() {
                                        Some(generate) => generate(buffer.as_mut_slice()),
                                        None => buffer.silence(),
                                    },
                                }
                            }
                            notifier.done(buffer);
                        }
                        Command::Reset => thread_flushing.store(false, Ordering::SeqCst),
                        Command::Close => break,
                    }
                }

                // anything still queued goes back untouched
                for command in queue.try_iter() {
                    if let Command::Buffer(buffer) = command {
                        notifier.done(buffer);
                    }
                }
                notifier.closed();
                generator
            })
            .map_err(|e| DeviceError::Open(e.to_string()))?;

        debug!("virtual {direction:?} device `{device}` open, {format:?}");
        self.running = Some(Running {
            commands,
            flushing,
            thread,
        });
        Ok(())
    }

    fn submit(&mut self, buffer: AudioBuffer) -> DeviceResult<()> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| DeviceError::Submit(String::from("virtual device is not open")))?;
        running
            .commands
            .send(Command::Buffer(buffer))
            .map_err(|_| DeviceError::Disconnected)
    }

    fn reset(&mut self) -> DeviceResult<()> {
        let Some(running) = &self.running else {
            return Ok(());
        };
        running.flushing.store(true, Ordering::SeqCst);
        running
            .commands
            .send(Command::Reset)
            .map_err(|_| DeviceError::Disconnected)
    }

    fn close(&mut self) -> DeviceResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.flushing.store(true, Ordering::SeqCst);
        // the thread may already be gone, joining tells
        let _ = running.commands.send(Command::Close);

        match running.thread.join() {
            Ok(generator) => {
                self.generator = generator;
                Ok(())
            }
            Err(_) => {
                warn!("virtual device thread panicked");
                Err(DeviceError::Close(String::from("virtual device thread panicked")))
            }
        }
    }
}
