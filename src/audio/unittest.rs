//! pipeline tests against a scripted device
//!
//! `FakeDevice` runs a `VirtualDevice` behind a relay thread. It can hang in or refuse the open,
//! swallow the open confirmation or stop returning buffers, and logs every finished buffer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel;

use super::buffer::AudioBuffer;
use super::config::PipelineConfig;
use super::device::{AudioDevice, DeviceEvent, Direction, Notifier};
use super::session::{AudioInput, AudioOutput, Capture, Render, StreamState};
use super::virtual_device::VirtualDevice;
use crate::config::StreamFormat;
use crate::error::{ConfigError, DeviceError, DeviceResult, PipelineError};

#[derive(Debug, Clone, Default)]
struct Script {
    refuse_open: bool,
    never_confirm: bool,
    /// buffers returned before the device goes quiet
    stall_after: Option<usize>,
    /// time spent inside `open` before anything happens
    open_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Log {
    opened: Vec<String>,
    loud: usize,
    silent: usize,
}

struct FakeDevice {
    script: Script,
    log: Arc<Mutex<Log>>,
    inner: VirtualDevice,
    relay: Option<JoinHandle<()>>,
}
impl FakeDevice {
    fn new(script: Script) -> (Self, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let device = Self {
            script,
            log: log.clone(),
            inner: VirtualDevice::realtime().with_generator(|buf: &mut [f32]| buf.fill(0.25)),
            relay: None,
        };
        (device, log)
    }
}

impl AudioDevice for FakeDevice {
    fn open(
        &mut self,
        device: &str,
        direction: Direction,
        format: StreamFormat,
        notifier: Notifier,
    ) -> DeviceResult<()> {
        if let Some(delay) = self.script.open_delay {
            thread::sleep(delay);
        }
        if self.script.refuse_open {
            return Err(DeviceError::Open(format!("`{device}` refused")));
        }
        self.log.lock().unwrap().opened.push(device.to_string());

        let (sender, events) = channel::unbounded();
        self.inner.open(device, direction, format, Notifier::new(sender))?;

        let script = self.script.clone();
        let log = self.log.clone();
        self.relay = Some(thread::spawn(move || {
            let mut returned = 0;
            let mut held: Vec<AudioBuffer> = Vec::new();
            for event in events.iter() {
                match event {
                    DeviceEvent::Opened if script.never_confirm => {}
                    DeviceEvent::Done(buffer) => {
                        {
                            let mut log = log.lock().unwrap();
                            if buffer.is_silent() {
                                log.silent += 1;
                            } else {
                                log.loud += 1;
                            }
                        }
                        if script.stall_after.map_or(false, |n| returned >= n) {
                            held.push(buffer);
                        } else {
                            returned += 1;
                            notifier.done(buffer);
                        }
                    }
                    DeviceEvent::Closed => {
                        held.clear();
                        notifier.closed();
                    }
                    other => {
                        notifier.notify(other);
                    }
                }
            }
        }));
        Ok(())
    }

    fn submit(&mut self, buffer: AudioBuffer) -> DeviceResult<()> {
        self.inner.submit(buffer)
    }

    fn reset(&mut self) -> DeviceResult<()> {
        self.inner.reset()
    }

    fn close(&mut self) -> DeviceResult<()> {
        let closed = self.inner.close();
        if let Some(relay) = self.relay.take() {
            relay.join().unwrap();
        }
        closed
    }
}

/// constant output, counts rendered buffers, runs dry after `limit` buffers
struct Constant {
    rendered: Arc<AtomicUsize>,
    limit: Option<usize>,
}
impl Render for Constant {
    fn render(&mut self, out: &mut [f32]) -> bool {
        out.fill(0.5);
        let rendered = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
        self.limit.map_or(true, |limit| rendered < limit)
    }
}

struct Collect {
    samples: Arc<Mutex<Vec<f32>>>,
}
impl Capture for Collect {
    fn capture(&mut self, samples: &[f32]) {
        self.samples.lock().unwrap().extend_from_slice(samples);
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        device: String::from("fake"),
        format: StreamFormat {
            sample_rate: 44_100,
            channels: 2,
        },
        buffer_frames: 64,
        buffer_count: 4,
        open_timeout: Duration::from_millis(300),
        close_timeout: Duration::from_millis(300),
        stall_timeout: Duration::from_millis(150),
        poll_interval: Duration::from_millis(2),
        stop_attempts: 500,
    }
}

fn input(script: Script) -> (AudioInput<FakeDevice, Collect>, Arc<Mutex<Vec<f32>>>) {
    let (device, _) = FakeDevice::new(script);
    let samples = Arc::new(Mutex::new(Vec::new()));
    let capture = Collect {
        samples: samples.clone(),
    };
    (AudioInput::new(device, capture, config()).unwrap(), samples)
}

fn output(script: Script, limit: Option<usize>) -> (AudioOutput<FakeDevice, Constant>, Arc<Mutex<Log>>, Arc<AtomicUsize>) {
    let (device, log) = FakeDevice::new(script);
    let rendered = Arc::new(AtomicUsize::new(0));
    let render = Constant {
        rendered: rendered.clone(),
        limit,
    };
    (AudioOutput::new(device, render, config()).unwrap(), log, rendered)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn open_then_close_releases_everything() {
    let (mut stream, _, _) = output(Script::default(), None);
    assert_eq!(stream.state(), StreamState::Closed);

    let start = Instant::now();
    stream.open().unwrap();
    assert_eq!(stream.state(), StreamState::Running);
    assert_eq!(stream.live_buffers(), 4);

    stream.close().unwrap();
    assert!(start.elapsed() < Duration::from_millis(600));
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(stream.live_buffers(), 0);
    assert_eq!(stream.last_error(), None);
}

#[test]
fn repeated_cycles_do_not_leak() {
    let (mut stream, log, _) = output(Script::default(), None);
    for _ in 0..20 {
        stream.open().unwrap();
        stream.close().unwrap();
        assert_eq!(stream.live_buffers(), 0);
    }
    assert_eq!(log.lock().unwrap().opened.len(), 20);

    // closing twice is harmless
    stream.close().unwrap();
}

#[test]
fn renders_into_submitted_buffers() {
    let (mut stream, log, rendered) = output(Script::default(), None);
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().loud >= 20));
    assert!(rendered.load(Ordering::SeqCst) >= 20);
    assert_eq!(log.lock().unwrap().silent, 0);

    stream.close().unwrap();
    assert_eq!(stream.live_buffers(), 0);
}

#[test]
fn stop_leaves_only_silence_and_start_resumes() {
    let (mut stream, log, _) = output(Script::default(), None);
    stream.open().unwrap();
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().loud >= 4));

    assert!(stream.stop());
    assert!(stream.is_muted());
    assert_eq!(stream.state(), StreamState::Running);

    let loud = log.lock().unwrap().loud;
    let silent = log.lock().unwrap().silent;
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().silent >= silent + 8));
    assert_eq!(log.lock().unwrap().loud, loud);

    stream.start();
    assert!(!stream.is_muted());
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().loud >= loud + 4));

    stream.close().unwrap();
}

#[test]
fn exhausted_source_ends_and_mutes() {
    let (mut stream, log, rendered) = output(Script::default(), Some(3));
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(2), || stream.is_muted()));
    assert!(stream.take_ended());
    assert!(!stream.take_ended());
    assert_eq!(rendered.load(Ordering::SeqCst), 3);
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().silent >= 4));
    assert_eq!(log.lock().unwrap().loud, 3);

    stream.close().unwrap();
}

#[test]
fn refused_open_stays_closed() {
    let script = Script {
        refuse_open: true,
        ..Default::default()
    };
    let (mut stream, _, _) = output(script, None);

    let result = stream.open();
    assert!(matches!(result, Err(PipelineError::Device(DeviceError::Open(_)))));
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(stream.live_buffers(), 0);
    assert!(matches!(stream.last_error(), Some(DeviceError::Open(_))));
}

#[test]
fn unconfirmed_open_times_out_and_can_be_retried() {
    let script = Script {
        never_confirm: true,
        ..Default::default()
    };
    let (mut stream, _, _) = output(script, None);

    let start = Instant::now();
    let result = stream.open();
    let elapsed = start.elapsed();
    assert_eq!(
        result,
        Err(PipelineError::Device(DeviceError::OpenTimeout(Duration::from_millis(300))))
    );
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300 + 300 + 500), "{elapsed:?}");
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(stream.live_buffers(), 0);

    stream.device_mut().unwrap().script.never_confirm = false;
    stream.open().unwrap();
    assert_eq!(stream.state(), StreamState::Running);
    stream.close().unwrap();
}

#[test]
fn stall_forces_close_and_reopen_recovers() {
    let script = Script {
        stall_after: Some(6),
        ..Default::default()
    };
    let (mut stream, _, _) = output(script, None);
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(3), || stream.state() == StreamState::Closed));
    assert!(stream.last_error().map_or(false, |e| e.is_stall()));
    assert!(wait_until(Duration::from_secs(1), || stream.live_buffers() == 0));

    stream.device_mut().unwrap().script.stall_after = None;
    stream.open().unwrap();
    assert_eq!(stream.last_error(), None);
    assert_eq!(stream.state(), StreamState::Running);
    stream.close().unwrap();
    assert_eq!(stream.live_buffers(), 0);
}

#[test]
fn input_stall_forces_close_and_reopen_recovers() {
    let script = Script {
        stall_after: Some(6),
        ..Default::default()
    };
    let (mut stream, samples) = input(script);
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(3), || stream.state() == StreamState::Closed));
    assert!(stream.last_error().map_or(false, |e| e.is_stall()), "{:?}", stream.last_error());
    assert!(wait_until(Duration::from_secs(1), || stream.live_buffers() == 0));
    // only what came back before the device went quiet reached the capture
    assert_eq!(samples.lock().unwrap().len(), 6 * 128);

    stream.device_mut().unwrap().script.stall_after = None;
    stream.open().unwrap();
    assert_eq!(stream.last_error(), None);
    assert!(wait_until(Duration::from_secs(2), || samples.lock().unwrap().len() >= 10 * 128));

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(stream.live_buffers(), 0);
}

#[test]
fn long_buffers_do_not_count_as_a_stall() {
    // one second per buffer would outlast the 150 ms stall timeout
    let (device, _) = FakeDevice::new(Script::default());
    let render = Constant {
        rendered: Arc::new(AtomicUsize::new(0)),
        limit: None,
    };
    let long = PipelineConfig {
        buffer_frames: 44_100,
        ..config()
    };
    let result = AudioOutput::new(device, render, long);
    assert!(matches!(
        result.err(),
        Some(PipelineError::Config(ConfigError::StallTimeout { .. }))
    ));

    // 100 ms buffers with room for two of them
    let (device, log) = FakeDevice::new(Script::default());
    let render = Constant {
        rendered: Arc::new(AtomicUsize::new(0)),
        limit: None,
    };
    let config = PipelineConfig {
        buffer_frames: 4_410,
        stall_timeout: Duration::from_millis(250),
        ..config()
    };
    let mut stream = AudioOutput::new(device, render, config).unwrap();
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().loud >= 8));
    assert_eq!(stream.state(), StreamState::Running);
    assert_eq!(stream.last_error(), None);
    stream.close().unwrap();
}

#[test]
fn stuck_open_is_abandoned_and_retried() {
    let script = Script {
        open_delay: Some(Duration::from_millis(1_000)),
        ..Default::default()
    };
    let (mut stream, _, _) = output(script, None);

    let start = Instant::now();
    let result = stream.open();
    let elapsed = start.elapsed();
    assert_eq!(result, Err(PipelineError::Unresponsive(Duration::from_millis(600))));
    assert!(elapsed < Duration::from_millis(1_000), "{elapsed:?}");

    // still inside the device
    assert!(matches!(stream.open(), Err(PipelineError::Unresponsive(_))));

    // the worker shuts itself down once the device returns
    assert!(wait_until(Duration::from_secs(3), || stream.state() == StreamState::Closed));
    assert!(wait_until(Duration::from_secs(1), || stream.live_buffers() == 0));

    stream.device_mut().unwrap().script.open_delay = None;
    stream.open().unwrap();
    assert_eq!(stream.state(), StreamState::Running);
    stream.close().unwrap();
    assert_eq!(stream.live_buffers(), 0);
}

#[test]
fn set_device_reopens_on_the_new_name() {
    let (mut stream, log, _) = output(Script::default(), None);
    stream.open().unwrap();
    stream.set_device("other").unwrap();

    assert_eq!(stream.state(), StreamState::Running);
    assert_eq!(stream.config().device, "other");
    assert_eq!(log.lock().unwrap().opened, vec!["fake", "other"]);
    stream.close().unwrap();

    // switching a closed stream only remembers the name
    stream.set_device("third").unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(log.lock().unwrap().opened.len(), 2);
}

#[test]
fn input_feeds_capture_until_stopped() {
    let (mut stream, samples) = input(Script::default());
    stream.open().unwrap();

    assert!(wait_until(Duration::from_secs(2), || samples.lock().unwrap().len() >= 4 * 128));
    assert!(samples.lock().unwrap().iter().all(|s| *s == 0.25));

    assert!(stream.stop());
    let captured = samples.lock().unwrap().len();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(samples.lock().unwrap().len(), captured);

    stream.close().unwrap();
    assert_eq!(stream.live_buffers(), 0);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let (device, _) = FakeDevice::new(Script::default());
    let render = Constant {
        rendered: Arc::new(AtomicUsize::new(0)),
        limit: None,
    };
    let config = PipelineConfig {
        buffer_count: 1,
        ..config()
    };
    assert!(AudioOutput::new(device, render, config).is_err());
}
