use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// fixed size interleaved block cycling between worker and device
///
/// ownership is the in-flight flag: a buffer is either in its pool or handed to the device
#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    index: usize,
    live: Arc<AtomicUsize>,
}
impl AudioBuffer {
    fn new(index: usize, len: usize, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            samples: vec![0.0; len],
            index,
            live,
        }
    }

    /// slot of the owning pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn silence(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}
impl Drop for AudioBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// buffers allocated once per open, handed out strictly in ring order
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<Option<AudioBuffer>>,
    next: usize,
}
impl BufferPool {
    /// `live` is incremented for every allocated buffer and decremented when it is dropped
    pub fn new(count: usize, len: usize, live: Arc<AtomicUsize>) -> Self {
        let slots = (0..count)
            .map(|i| Some(AudioBuffer::new(i, len, live.clone())))
            .collect();
        Self { slots, next: 0 }
    }

    /// next buffer in ring order, `None` while that one is still in flight
    pub fn take(&mut self) -> Option<AudioBuffer> {
        let buffer = self.slots.get_mut(self.next)?.take()?;
        self.next = (self.next + 1) % self.slots.len();
        Some(buffer)
    }

    /// returns a buffer the device is done with
    ///
    /// buffers of another pool are dropped
    pub fn release(&mut self, buffer: AudioBuffer) {
        if let Some(slot) = self.slots.get_mut(buffer.index) {
            if slot.is_none() {
                *slot = Some(buffer);
            }
        }
    }

    /// buffers currently handed out
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
