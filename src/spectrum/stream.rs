//! # How it works
//! ```text
//!     ┌──────────────────────────┐
//!     │ thread that continuously │
//!     │  pushes data to Stream   │
//!     └──────────────────────────┘
//!           |
//!           | interleaved samples of any length
//!           ↓
//! ┌───────────────────┐  fixed blocks  ┌─────────────┐
//! │      Stream       │ -------------> |  Analyzer   |
//! |                   │ <------------- |             |
//! └───────────────────┘                └─────────────┘
//!        ↑ └----------┐
//!        └----------┐ |
//!     snapshot()    | | peaks, curve, threshold, gain
//!                   | ↓
//!     ┌─────────────────────────┐
//!     │thread that draws things │
//!     └─────────────────────────┘
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::spectrum::analyzer::Analyzer;
use crate::spectrum::snapshot::Snapshot;

/// chops arbitrarily sized input into fixed analysis blocks
pub struct Stream {
    analyzer: Analyzer,
    raw_buffer: Vec<f32>,

    /// frames per analysis block
    block_frames: usize,
}
impl Stream {
    pub fn new(analyzer: Analyzer, block_frames: usize) -> ConfigResult<Self> {
        if block_frames == 0 {
            return Err(ConfigError::Zero { name: "block_frames" });
        }
        let cap = block_frames * analyzer.config().channels as usize * 2;
        Ok(Self {
            analyzer,
            raw_buffer: Vec::with_capacity(cap),
            block_frames,
        })
    }

    pub fn push_data(&mut self, data: &[f32]) {
        self.raw_buffer.extend_from_slice(data);
    }

    /// analyses every complete block, returns how many were processed
    ///
    /// the incomplete remainder stays buffered for the next call
    pub fn update(&mut self) -> usize {
        let block_len = self.block_frames * self.analyzer.config().channels as usize;
        let blocks = self.raw_buffer.len() / block_len;

        for block in self.raw_buffer.chunks_exact(block_len) {
            self.analyzer.update(block);
        }
        self.raw_buffer.drain(..blocks * block_len);

        blocks
    }

    /// samples waiting for the next complete block
    pub fn pending(&self) -> usize {
        self.raw_buffer.len()
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut Analyzer {
        &mut self.analyzer
    }

    pub fn snapshot(&self) -> Snapshot {
        self.analyzer.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::analyzer::tests::small_config;

    #[test]
    fn processes_whole_blocks_and_keeps_remainder() {
        let analyzer = Analyzer::new(small_config(2)).unwrap();
        let mut stream = Stream::new(analyzer, 100).unwrap();

        stream.push_data(&[0.1; 450]);
        assert_eq!(stream.update(), 2);
        assert_eq!(stream.pending(), 50);

        stream.push_data(&[0.1; 150]);
        assert_eq!(stream.update(), 1);
        assert_eq!(stream.pending(), 0);

        assert_eq!(stream.update(), 0);
    }

    #[test]
    fn zero_block_is_rejected() {
        let analyzer = Analyzer::new(small_config(1)).unwrap();
        assert!(Stream::new(analyzer, 0).is_err());
    }
}
