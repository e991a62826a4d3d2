//! Surge event log.
//!
//! Append-only record of DANGER readings. While the zone stays in DANGER, a
//! new entry is suppressed when its message equals the message of the latest
//! entry; only that one entry is compared, never the full history. Any
//! non-DANGER reading ends the surge, and the next DANGER reading is always
//! recorded.
//!
//! This relaxes the plain "differs from the previous entry" rule: after a
//! surge ends, the log may hold two adjacent entries with the same message,
//! one per surge.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};

use crate::model::{CrowdReading, EventLogEntry, ZoneStatus};

/// Deduplicated log of surge alerts.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    /// Retention cap. `None` keeps every entry.
    max_entries: Option<NonZeroUsize>,
    /// The previous reading was DANGER.
    in_surge: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that keeps at most `max_entries`, discarding the oldest first.
    pub fn with_cap(max_entries: NonZeroUsize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: Some(max_entries),
            in_surge: false,
        }
    }

    /// Observe `reading` and append an entry if it is a DANGER reading whose
    /// message is not a repeat within the current surge. Must be called for
    /// every accepted reading so surge boundaries are seen. Returns the
    /// appended entry.
    pub fn record_if_danger(&mut self, reading: &CrowdReading) -> Option<EventLogEntry> {
        if reading.status != ZoneStatus::Danger {
            self.in_surge = false;
            return None;
        }

        let message = surge_message(reading.received_at, reading.count);
        let repeat = self.in_surge
            && self
                .entries
                .back()
                .is_some_and(|last| last.message == message);
        self.in_surge = true;
        if repeat {
            return None;
        }

        let entry = EventLogEntry {
            timestamp: reading.received_at,
            message,
        };
        self.entries.push_back(entry.clone());

        if let Some(cap) = self.max_entries {
            while self.entries.len() > cap.get() {
                self.entries.pop_front();
            }
        }

        Some(entry)
    }

    /// An owned copy of the log, oldest first.
    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `[HH:MM:SS] SURGE DETECTED: 120 PAX`, time in UTC at second resolution.
fn surge_message(at: DateTime<Utc>, count: u64) -> String {
    format!("[{}] SURGE DETECTED: {} PAX", at.format("%H:%M:%S"), count)
}
