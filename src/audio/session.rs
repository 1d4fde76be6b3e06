//! # How it works
//! ```text
//!   control thread               worker thread                    device
//!        │                             │                             │
//!     open() ──── spawn ─────────► open ──────────────────────────►  │
//!        │                        wait Opened ◄──── notifier ──────  │
//!        │                        submit every buffer ───────────►   │
//!        ◄──────── ready ──────────    │                             │
//!        │                        ┌► Done(buffer) ◄── notifier ───── │
//!   stop()/start()  ─ flags ─►    │  render / capture                │
//!        │                        └─ submit(buffer) ──────────────►  │
//!     close() ─── closing ───►    reset, close, wait Closed ─────►   │
//!        ◄──────── join ───────────    │                             │
//! ```
//!
//! the device is moved into the worker on `open` and handed back on `close`, so a closed
//! stream can be opened again. Buffers are owned by exactly one side at a time.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::audio::buffer::{AudioBuffer, BufferPool};
use crate::audio::config::PipelineConfig;
use crate::audio::device::{AudioDevice, DeviceEvent, Direction, Notifier};
use crate::error::{DeviceError, DeviceResult, PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Running,

    /// closing, the worker is shutting the device down
    Stopping,
}
impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Opening,
            2 => StreamState::Running,
            3 => StreamState::Stopping,
            _ => StreamState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StreamState::Closed => 0,
            StreamState::Opening => 1,
            StreamState::Running => 2,
            StreamState::Stopping => 3,
        }
    }
}

/// produces the samples of an output stream
pub trait Render: Send + 'static {
    /// fills the interleaved `out` completely, returns false once the source is exhausted
    fn render(&mut self, out: &mut [f32]) -> bool;
}

/// consumes the samples of an input stream
pub trait Capture: Send + 'static {
    fn capture(&mut self, samples: &[f32]);
}

/// what the worker does with a buffer on either side of the device
pub trait Endpoint: Send + 'static {
    const DIRECTION: Direction;

    /// before the buffer is submitted, false once there is nothing left to play
    fn prepare(&mut self, buffer: &mut [f32]) -> bool;

    /// after the device returned the buffer
    fn complete(&mut self, buffer: &[f32]);
}

/// output side, wraps a `Render`
pub struct Playback<R>(pub R);
impl<R: Render> Endpoint for Playback<R> {
    const DIRECTION: Direction = Direction::Output;

    fn prepare(&mut self, buffer: &mut [f32]) -> bool {
        self.0.render(buffer)
    }

    fn complete(&mut self, _buffer: &[f32]) {}
}

/// input side, wraps a `Capture`
pub struct Recording<C>(pub C);
impl<C: Capture> Endpoint for Recording<C> {
    const DIRECTION: Direction = Direction::Input;

    fn prepare(&mut self, buffer: &mut [f32]) -> bool {
        buffer.iter_mut().for_each(|s| *s = 0.0);
        true
    }

    fn complete(&mut self, buffer: &[f32]) {
        self.0.capture(buffer)
    }
}

/// flags shared between control thread and worker
#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    closing: AtomicBool,
    mute_request: AtomicBool,
    muted: AtomicBool,
    ended: AtomicBool,
    live: Arc<AtomicUsize>,
    last_error: Mutex<Option<DeviceError>>,
}
impl Shared {
    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// keeps the first error since the last open
    fn fail(&self, error: DeviceError) {
        let mut slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn last_error(&self) -> Option<DeviceError> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn reset(&self) {
        self.closing.store(false, Ordering::SeqCst);
        self.mute_request.store(false, Ordering::SeqCst);
        self.muted.store(false, Ordering::SeqCst);
        self.ended.store(false, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// what a finished worker hands back
struct Exit<D, E> {
    device: D,
    endpoint: E,

    /// failure while shutting the device down
    error: Option<DeviceError>,
}

/// one input or output stream of a device
///
/// use through `AudioOutput` and `AudioInput`
pub struct Pipeline<D: AudioDevice, E: Endpoint> {
    config: PipelineConfig,
    shared: Arc<Shared>,
    idle: Option<(D, E)>,
    worker: Option<JoinHandle<Exit<D, E>>>,
}

/// plays what a `Render` produces
pub type AudioOutput<D, R> = Pipeline<D, Playback<R>>;

/// feeds what the device records into a `Capture`
pub type AudioInput<D, C> = Pipeline<D, Recording<C>>;

impl<D: AudioDevice, R: Render> Pipeline<D, Playback<R>> {
    pub fn new(device: D, render: R, config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_endpoint(device, Playback(render), config)
    }

    /// true once after the source ran out, the stream is muted from then on
    pub fn take_ended(&self) -> bool {
        self.shared.ended.swap(false, Ordering::SeqCst)
    }
}

impl<D: AudioDevice, C: Capture> Pipeline<D, Recording<C>> {
    pub fn new(device: D, capture: C, config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_endpoint(device, Recording(capture), config)
    }
}

impl<D: AudioDevice, E: Endpoint> Pipeline<D, E> {
    pub fn with_endpoint(device: D, endpoint: E, config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(Shared::default()),
            idle: Some((device, endpoint)),
            worker: None,
        })
    }

    /// allocates the buffers, opens the device and blocks until the stream runs
    ///
    /// on failure the stream is `Closed` again and can be retried
    pub fn open(&mut self) -> PipelineResult<()> {
        self.reap();
        if self.worker.is_some() {
            if self.shared.closing.load(Ordering::SeqCst) {
                // an earlier open gave up on this worker and it has not come back yet
                return Err(PipelineError::Unresponsive(self.report_timeout()));
            }
            debug!("{} stream already open", name(E::DIRECTION));
            return Ok(());
        }
        let (device, endpoint) = self.idle.take().ok_or(PipelineError::WorkerPanicked)?;

        self.shared.reset();
        self.shared.set_state(StreamState::Opening);

        let (ready_sender, ready) = channel::bounded(1);
        let config = self.config.clone();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("cqsynth-{}", name(E::DIRECTION)))
            .spawn(move || run(device, endpoint, config, shared, ready_sender));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(StreamState::Closed);
                return Err(DeviceError::Backend(e.to_string()).into());
            }
        };

        // the worker reports within open_timeout plus the shutdown after a failed start
        match ready.recv_timeout(self.report_timeout()) {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                info!("{} stream open on `{}`", name(E::DIRECTION), self.config.device);
                Ok(())
            }
            Ok(Err(e)) => {
                self.join(handle)?;
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} worker stuck in `{}`, closing it once it returns",
                    name(E::DIRECTION),
                    self.config.device
                );
                self.shared.closing.store(true, Ordering::SeqCst);
                self.worker = Some(handle);
                Err(PipelineError::Unresponsive(self.report_timeout()))
            }
            // worker died before reporting
            Err(RecvTimeoutError::Disconnected) => {
                self.join(handle)?;
                Err(PipelineError::WorkerPanicked)
            }
        }
    }

    fn report_timeout(&self) -> Duration {
        self.config.open_timeout + self.config.close_timeout
    }

    /// stops the worker and releases the device and every buffer
    pub fn close(&mut self) -> PipelineResult<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        if self.shared.state() != StreamState::Closed {
            self.shared.set_state(StreamState::Stopping);
        }
        self.shared.closing.store(true, Ordering::SeqCst);

        let error = self.join(handle)?;
        info!("{} stream closed", name(E::DIRECTION));
        match error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// closes and reopens on another device
    pub fn set_device(&mut self, device: impl Into<String>) -> PipelineResult<()> {
        self.reap();
        let was_open = self.worker.is_some();
        self.close()?;

        self.config.device = device.into();
        debug!("{} device set to `{}`", name(E::DIRECTION), self.config.device);
        if was_open {
            self.open()?;
        }
        Ok(())
    }

    /// lets samples through again after `stop` or the end of the source
    pub fn start(&self) {
        self.shared.mute_request.store(false, Ordering::SeqCst);
        self.shared.muted.store(false, Ordering::SeqCst);
    }

    /// silences the stream without closing the device
    ///
    /// blocks until the worker confirms that only silence is in flight, false if that does not
    /// happen within `stop_attempts * poll_interval`
    pub fn stop(&self) -> bool {
        self.shared.mute_request.store(true, Ordering::SeqCst);
        if self.shared.state() != StreamState::Running {
            return true;
        }

        for _ in 0..self.config.stop_attempts {
            if self.shared.muted.load(Ordering::SeqCst) {
                info!("{} stream stopped", name(E::DIRECTION));
                return true;
            }
            if self.shared.state() != StreamState::Running {
                return true;
            }
            thread::sleep(self.config.poll_interval);
        }

        warn!(
            "{} stream did not acknowledge stop within {:?}",
            name(E::DIRECTION),
            self.config.poll_interval * self.config.stop_attempts
        );
        false
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// first device failure of the current or last session, stalls included
    pub fn last_error(&self) -> Option<DeviceError> {
        self.shared.last_error()
    }

    /// buffers currently allocated, 0 whenever the stream is closed
    pub fn live_buffers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// render or capture side, only reachable while closed
    pub fn endpoint_mut(&mut self) -> Option<&mut E> {
        self.reap();
        self.idle.as_mut().map(|(_, endpoint)| endpoint)
    }

    /// only reachable while closed
    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.reap();
        self.idle.as_mut().map(|(device, _)| device)
    }

    /// picks up a worker that ended on its own, after a stall for example
    fn reap(&mut self) {
        if self.worker.as_ref().map_or(false, |h| h.is_finished()) {
            if let Some(handle) = self.worker.take() {
                let _ = self.join(handle);
            }
        }
    }

    fn join(&mut self, handle: JoinHandle<Exit<D, E>>) -> PipelineResult<Option<DeviceError>> {
        let joined = handle.join();
        self.shared.set_state(StreamState::Closed);

        let exit = joined.map_err(|_| PipelineError::WorkerPanicked)?;
        self.idle = Some((exit.device, exit.endpoint));
        Ok(exit.error)
    }
}

impl<D: AudioDevice, E: Endpoint> Drop for Pipeline<D, E> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.close();
        }
    }
}

fn name(direction: Direction) -> &'static str {
    match direction {
        Direction::Output => "output",
        Direction::Input => "input",
    }
}

/// body of the worker thread
fn run<D: AudioDevice, E: Endpoint>(
    mut device: D,
    endpoint: E,
    config: PipelineConfig,
    shared: Arc<Shared>,
    ready: Sender<PipelineResult<()>>,
) -> Exit<D, E> {
    let (sender, events) = channel::unbounded();

    if let Err(e) = device.open(&config.device, E::DIRECTION, config.format, Notifier::new(sender)) {
        warn!("failed to open `{}`: {e}", config.device);
        shared.fail(e.clone());
        shared.set_state(StreamState::Closed);
        let _ = ready.send(Err(e.into()));
        return Exit {
            device,
            endpoint,
            error: None,
        };
    }

    let pool = BufferPool::new(config.buffer_count, config.buffer_len(), shared.live.clone());
    let mut worker = Worker {
        device,
        endpoint,
        config,
        shared,
        events,
        pool,
        silent_run: 0,
    };

    match worker.start() {
        Ok(()) => {
            worker.shared.set_state(StreamState::Running);
            let _ = ready.send(Ok(()));
            drop(ready);

            if let Err(e) = worker.stream() {
                warn!("{} stream failed, forcing close: {e}", name(E::DIRECTION));
                worker.shared.fail(e);
            }
        }
        Err(e) => {
            warn!("{} stream failed to start: {e}", name(E::DIRECTION));
            worker.shared.fail(e.clone());
            // reported after the device is shut down, so a retry finds it free
            let error = worker.finalize();
            let shared = worker.shared.clone();
            let exit = worker.exit(error);
            shared.set_state(StreamState::Closed);
            let _ = ready.send(Err(e.into()));
            return exit;
        }
    }

    let error = worker.finalize();
    let shared = worker.shared.clone();
    let exit = worker.exit(error);
    shared.set_state(StreamState::Closed);
    exit
}

struct Worker<D, E> {
    device: D,
    endpoint: E,
    config: PipelineConfig,
    shared: Arc<Shared>,
    events: Receiver<DeviceEvent>,
    pool: BufferPool,

    /// silent buffers submitted in a row since the last rendered one
    silent_run: usize,
}
impl<D: AudioDevice, E: Endpoint> Worker<D, E> {
    /// waits for the device to confirm and submits every buffer once
    fn start(&mut self) -> DeviceResult<()> {
        let deadline = Instant::now() + self.config.open_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(DeviceEvent::Opened) => break,
                Ok(DeviceEvent::Done(buffer)) => self.pool.release(buffer),
                Ok(DeviceEvent::Error(e)) => return Err(e),
                Ok(DeviceEvent::Closed) => {
                    return Err(DeviceError::Open(String::from("device closed while opening")))
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("`{}` did not confirm open within {:?}", self.config.device, self.config.open_timeout);
                    return Err(DeviceError::OpenTimeout(self.config.open_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Disconnected),
            }
        }

        self.refill()?;
        info!(
            "{} stream primed with {} buffers of {} frames",
            name(E::DIRECTION),
            self.pool.capacity(),
            self.config.buffer_frames
        );
        Ok(())
    }

    /// runs until `closing` is raised or the device fails
    fn stream(&mut self) -> DeviceResult<()> {
        let mut last_done = Instant::now();

        while !self.shared.closing.load(Ordering::SeqCst) {
            match self.events.recv_timeout(self.config.poll_interval) {
                Ok(DeviceEvent::Done(buffer)) => {
                    last_done = Instant::now();
                    self.complete(buffer);
                }
                Ok(DeviceEvent::Error(e)) => return Err(e),
                Ok(DeviceEvent::Closed) => {
                    return Err(DeviceError::Backend(String::from("device closed unexpectedly")))
                }
                Ok(DeviceEvent::Opened) => {}
                Err(RecvTimeoutError::Timeout) => {
                    let waited = last_done.elapsed();
                    if self.pool.in_flight() > 0 && waited >= self.config.stall_timeout {
                        return Err(DeviceError::Stall { waited });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Disconnected),
            }

            self.refill()?;
        }

        Ok(())
    }

    fn complete(&mut self, buffer: AudioBuffer) {
        let muted = E::DIRECTION == Direction::Input && self.shared.mute_request.load(Ordering::SeqCst);
        if muted {
            self.shared.muted.store(true, Ordering::SeqCst);
        } else {
            self.endpoint.complete(buffer.as_slice());
        }
        self.pool.release(buffer);
    }

    /// submits every free buffer in ring order
    fn refill(&mut self) -> DeviceResult<()> {
        while let Some(mut buffer) = self.pool.take() {
            self.prepare(&mut buffer);
            self.device.submit(buffer).map_err(|e| {
                warn!("{} buffer rejected: {e}", name(E::DIRECTION));
                e
            })?;
        }
        Ok(())
    }

    fn prepare(&mut self, buffer: &mut AudioBuffer) {
        if E::DIRECTION == Direction::Input {
            self.endpoint.prepare(buffer.as_mut_slice());
            return;
        }

        let silent = self.shared.mute_request.load(Ordering::SeqCst) || self.shared.muted.load(Ordering::SeqCst);
        if silent {
            buffer.silence();
            self.silent_run += 1;
            // every buffer the device holds is silent now
            if self.silent_run >= self.pool.capacity() {
                self.shared.muted.store(true, Ordering::SeqCst);
            }
            return;
        }

        self.silent_run = 0;
        if !self.endpoint.prepare(buffer.as_mut_slice()) {
            debug!("output source ended");
            self.shared.ended.store(true, Ordering::SeqCst);
            self.shared.mute_request.store(true, Ordering::SeqCst);
        }
    }

    /// reset, close and wait for the device to confirm, buffers coming back are collected
    fn finalize(&mut self) -> Option<DeviceError> {
        let mut error = None;

        if let Err(e) = self.device.reset() {
            warn!("failed to reset `{}`: {e}", self.config.device);
            error = Some(e);
        }
        if let Err(e) = self.device.close() {
            warn!("failed to close `{}`: {e}", self.config.device);
            return error.or(Some(e));
        }

        let deadline = Instant::now() + self.config.close_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(DeviceEvent::Closed) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(DeviceEvent::Done(buffer)) => self.pool.release(buffer),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!("`{}` did not confirm close within {:?}", self.config.device, self.config.close_timeout);
                    error = error.or(Some(DeviceError::CloseTimeout(self.config.close_timeout)));
                    break;
                }
            }
        }

        if self.pool.in_flight() > 0 {
            debug!("{} buffers not returned by `{}`", self.pool.in_flight(), self.config.device);
        }
        if let Some(e) = &error {
            self.shared.fail(e.clone());
        }
        error
    }

    /// drops buffers and channel, hands device and endpoint back
    fn exit(self, error: Option<DeviceError>) -> Exit<D, E> {
        let Worker { device, endpoint, .. } = self;
        Exit {
            device,
            endpoint,
            error,
        }
    }
}
