use std::sync::{Arc, Mutex};

/// copy of the display outputs of one analysis block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub peaks: Vec<f64>,
    pub curve: Vec<f64>,
    pub threshold: Vec<f64>,
    pub gain: f64,
    pub max: f64,
}

/// latest snapshot, written by the audio worker and read by whoever draws
///
/// readers always get a complete copy, never a half written one
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<Mutex<Option<Snapshot>>>,
}
impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(snapshot);
    }

    /// newest snapshot, `None` before the first publish
    pub fn latest(&self) -> Option<Snapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// newest snapshot if there was a publish since the last `take`
    pub fn take(&self) -> Option<Snapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_take_latest() {
        let cell = SnapshotCell::new();
        assert_eq!(cell.latest(), None);

        let reader = cell.clone();
        cell.publish(Snapshot {
            gain: 2.0,
            ..Default::default()
        });
        assert_eq!(reader.latest().map(|s| s.gain), Some(2.0));
        assert_eq!(reader.take().map(|s| s.gain), Some(2.0));
        assert_eq!(reader.take(), None);
    }
}
