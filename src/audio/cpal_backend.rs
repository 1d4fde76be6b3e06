//! `AudioDevice` on top of cpal
//!
//! cpal pulls samples from its own realtime callback. The callback drains submitted buffers
//! one after the other and hands each finished buffer back through the notifier, so the
//! pipeline sees the same done notifications it would get from any other device.
//! `cpal::Stream` is not `Send`, it lives on a parked helper thread for as long as the device
//! is open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, Receiver, Sender};
use log::debug;

use crate::audio::buffer::AudioBuffer;
use crate::audio::converter::{f32_to_i16, f32_to_u16, i16_to_f32, u16_to_f32};
use crate::audio::device::{AudioDevice, Direction, Notifier};
use crate::config::StreamFormat;
use crate::error::{DeviceError, DeviceResult};

/// names of every device cpal can see in `direction`
pub fn fetch_devices(direction: Direction) -> DeviceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Output => host.output_devices(),
        Direction::Input => host.input_devices(),
    }
    .map_err(|e| DeviceError::Backend(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

struct StreamThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct CpalDevice {
    queue: Option<(Sender<AudioBuffer>, Receiver<AudioBuffer>)>,
    notifier: Option<Notifier>,
    stream: Option<StreamThread>,
}
impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            stream.handle.thread().unpark();
            let _ = stream.handle.join();
        }
    }
}

impl AudioDevice for CpalDevice {
    fn open(
        &mut self,
        device: &str,
        direction: Direction,
        format: StreamFormat,
        notifier: Notifier,
    ) -> DeviceResult<()> {
        if self.stream.is_some() {
            return Err(DeviceError::Open(String::from("cpal device is already open")));
        }

        let (sender, receiver) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let name = device.to_string();
        let feed = Feed {
            queue: receiver.clone(),
            current: None,
            pos: 0,
            notifier: notifier.clone(),
        };
        let thread_notifier = notifier.clone();
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(String::from("cqsynth-cpal"))
            .spawn(move || {
                let stream = match build_stream(&name, direction, format, feed, thread_notifier.clone()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        thread_notifier.error(e);
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    thread_notifier.error(DeviceError::Open(e.to_string()));
                    return;
                }
                thread_notifier.opened();

                // keeps the stream alive
                while !thread_stop.load(Ordering::SeqCst) {
                    thread::park();
                }
            })
            .map_err(|e| DeviceError::Open(e.to_string()))?;

        self.queue = Some((sender, receiver));
        self.notifier = Some(notifier);
        self.stream = Some(StreamThread { stop, handle });
        Ok(())
    }

    fn submit(&mut self, buffer: AudioBuffer) -> DeviceResult<()> {
        let (sender, _) = self
            .queue
            .as_ref()
            .ok_or_else(|| DeviceError::Submit(String::from("cpal device is not open")))?;
        sender.send(buffer).map_err(|_| DeviceError::Disconnected)
    }

    fn reset(&mut self) -> DeviceResult<()> {
        self.stop_stream();

        // the buffer the callback was working on went down with the stream
        if let (Some((_, receiver)), Some(notifier)) = (&self.queue, &self.notifier) {
            for buffer in receiver.try_iter() {
                notifier.done(buffer);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.stop_stream();
        self.queue = None;
        if let Some(notifier) = self.notifier.take() {
            notifier.closed();
        }
        Ok(())
    }
}

/// moves samples between the callback and the submitted buffers
struct Feed {
    queue: Receiver<AudioBuffer>,
    current: Option<AudioBuffer>,
    pos: usize,
    notifier: Notifier,
}
impl Feed {
    /// unplayed or unrecorded part of the current buffer, `None` when nothing is queued
    fn remaining(&mut self) -> Option<&mut [f32]> {
        loop {
            let left = self.current.as_ref().map(|b| b.len().saturating_sub(self.pos));
            match left {
                Some(left) if left > 0 => break,
                Some(_) => {
                    if let Some(done) = self.current.take() {
                        self.notifier.done(done);
                    }
                }
                None => {}
            }
            self.current = Some(self.queue.try_recv().ok()?);
            self.pos = 0;
        }
        let pos = self.pos;
        self.current.as_mut().map(|b| &mut b.as_mut_slice()[pos..])
    }

    fn play(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            // underrun
            let Some(remaining) = self.remaining() else {
                out[written..].iter_mut().for_each(|s| *s = 0.0);
                return;
            };
            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            self.pos += n;
        }
    }

    fn record(&mut self, input: &[f32]) {
        let mut read = 0;
        while read < input.len() {
            // overrun, the rest is lost
            let Some(remaining) = self.remaining() else {
                return;
            };
            let n = remaining.len().min(input.len() - read);
            remaining[..n].copy_from_slice(&input[read..read + n]);
            read += n;
            self.pos += n;
        }
    }
}

fn find_device(host: &cpal::Host, name: &str, direction: Direction) -> DeviceResult<cpal::Device> {
    let not_found = || DeviceError::NotFound(name.to_string());
    match (name, direction) {
        ("default", Direction::Output) => host.default_output_device().ok_or_else(not_found),
        ("default", Direction::Input) => host.default_input_device().ok_or_else(not_found),
        (name, direction) => {
            let mut devices = match direction {
                Direction::Output => host.output_devices(),
                Direction::Input => host.input_devices(),
            }
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(not_found)
        }
    }
}

fn unsupported(sample_format: cpal::SampleFormat) -> DeviceError {
    DeviceError::Open(format!("unsupported sample format {sample_format:?}"))
}

/// only the formats with a converter in `audio::converter`
fn check_sample_format(sample_format: cpal::SampleFormat) -> DeviceResult<()> {
    match sample_format {
        cpal::SampleFormat::I16 | cpal::SampleFormat::U16 | cpal::SampleFormat::F32 => Ok(()),
        other => Err(unsupported(other)),
    }
}

fn build_stream(
    name: &str,
    direction: Direction,
    format: StreamFormat,
    mut feed: Feed,
    notifier: Notifier,
) -> DeviceResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, name, direction)?;

    let sample_format = match direction {
        Direction::Output => device.default_output_config().map(|c| c.sample_format()),
        Direction::Input => device.default_input_config().map(|c| c.sample_format()),
    }
    .map_err(|e| DeviceError::Open(e.to_string()))?;
    check_sample_format(sample_format)?;

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    debug!("cpal `{name}` {direction:?} as {sample_format:?}, {config:?}");

    let on_error = move |e: cpal::StreamError| {
        notifier.error(DeviceError::Backend(e.to_string()));
    };
    let mut scratch: Vec<f32> = Vec::new();

    let stream = match (direction, sample_format) {
        (Direction::Output, cpal::SampleFormat::I16) => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                feed.play(&mut scratch);
                f32_to_i16(&scratch, data);
            },
            on_error,
            None,
        ),
        (Direction::Output, cpal::SampleFormat::U16) => device.build_output_stream(
            &config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                feed.play(&mut scratch);
                f32_to_u16(&scratch, data);
            },
            on_error,
            None,
        ),
        (Direction::Output, cpal::SampleFormat::F32) => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.play(data),
            on_error,
            None,
        ),
        (Direction::Input, cpal::SampleFormat::I16) => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| feed.record(&i16_to_f32(data)),
            on_error,
            None,
        ),
        (Direction::Input, cpal::SampleFormat::U16) => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| feed.record(&u16_to_f32(data)),
            on_error,
            None,
        ),
        (Direction::Input, cpal::SampleFormat::F32) => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| feed.record(data),
            on_error,
            None,
        ),
        (_, other) => return Err(unsupported(other)),
    };

    stream.map_err(|e| DeviceError::Open(e.to_string()))
}
