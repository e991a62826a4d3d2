//! Fixed-capacity rolling history of readings.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::model::CrowdReading;

/// Default number of readings kept for the density chart.
pub const DEFAULT_HISTORY_CAPACITY: NonZeroUsize = NonZeroUsize::new(50).unwrap();

/// Arrival-ordered FIFO of the most recent readings.
///
/// Insertion is always at the tail and eviction always from the head, so the
/// buffer holds exactly the last `min(capacity, pushed)` readings.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    readings: VecDeque<CrowdReading>,
    capacity: NonZeroUsize,
}

impl HistoryBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, reading: CrowdReading) {
        self.readings.push_back(reading);
        if self.readings.len() > self.capacity.get() {
            self.readings.pop_front();
        }
    }

    /// An owned copy of the buffer, oldest first.
    pub fn snapshot_all(&self) -> Vec<CrowdReading> {
        self.readings.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
