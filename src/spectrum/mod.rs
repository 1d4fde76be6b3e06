pub mod analyzer;
pub mod config;
pub mod filter;
pub mod gain;
pub mod peak;
pub mod snapshot;
pub mod stream;

pub use analyzer::{Analyzer, PeakRecord};
pub use config::{AnalyzerConfig, PeakTuning};
pub use snapshot::{Snapshot, SnapshotCell};
