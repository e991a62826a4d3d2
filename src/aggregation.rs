//! The state aggregator: the single writer of snapshot, history and event log.
//!
//! Every accepted reading updates all three structures inside one exclusive
//! section of a shared `RwLock`, so readers observe either the state before a
//! reading or the state after it, never a mix. Readers take the shared side of
//! the lock only long enough to clone what they need.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::decoder::{DecodeErrorKind, decode};
use crate::events::EventLog;
use crate::history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer};
use crate::model::{CrowdReading, EventLogEntry, IngestStats, Snapshot, StateView};

/// Sizing for the aggregator's in-memory structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Readings kept in the rolling history.
    pub history_capacity: NonZeroUsize,

    /// Optional retention cap on the event log. `None` keeps every entry.
    pub event_log_cap: Option<NonZeroUsize>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            event_log_cap: None,
        }
    }
}

/// Everything a single ingest updates together.
struct State {
    snapshot: Snapshot,
    history: HistoryBuffer,
    events: EventLog,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    malformed: AtomicU64,
    missing_field: AtomicU64,
    invalid_value: AtomicU64,
}

/// Owns the live view of the telemetry stream.
///
/// Construct once and share by `Arc` between the ingest task and any number
/// of readers.
pub struct StateAggregator {
    state: RwLock<State>,
    counters: Counters,
    started: Instant,
}

impl StateAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let events = match config.event_log_cap {
            Some(cap) => EventLog::with_cap(cap),
            None => EventLog::new(),
        };

        Self {
            state: RwLock::new(State {
                snapshot: Snapshot {
                    reading: CrowdReading::offline(Utc::now()),
                    revision: 0,
                },
                history: HistoryBuffer::new(config.history_capacity),
                events,
            }),
            counters: Counters::default(),
            started: Instant::now(),
        }
    }

    /// Ingest one raw payload, stamped with the current time.
    pub fn ingest(&self, raw: &[u8]) {
        self.ingest_at(raw, Utc::now());
    }

    /// Ingest one raw payload, stamped with `now`.
    ///
    /// Decode failures are counted and logged; they leave the state untouched.
    /// Returns the new revision when the reading was accepted.
    pub fn ingest_at(&self, raw: &[u8], now: DateTime<Utc>) -> Option<u64> {
        let reading = match decode(raw, now) {
            Ok(reading) => reading,
            Err(e) => {
                let counter = match e.kind() {
                    DecodeErrorKind::Malformed => &self.counters.malformed,
                    DecodeErrorKind::MissingField => &self.counters.missing_field,
                    DecodeErrorKind::InvalidValue => &self.counters.invalid_value,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, payload_len = raw.len(), "Dropped telemetry message");
                return None;
            }
        };

        let (revision, logged) = {
            let mut state = self.write();
            let revision = state.snapshot.revision + 1;
            let logged = state.events.record_if_danger(&reading);
            state.history.push(reading.clone());
            state.snapshot = Snapshot {
                reading: reading.clone(),
                revision,
            };
            (revision, logged)
        };
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);

        debug!(
            revision,
            count = reading.count,
            status = %reading.status,
            gate = %reading.gate,
            "Reading accepted"
        );
        if let Some(entry) = logged {
            warn!(message = %entry.message, "Surge event logged");
        }

        Some(revision)
    }

    /// The live reading and its revision.
    pub fn current_snapshot(&self) -> Snapshot {
        self.read().snapshot.clone()
    }

    /// The rolling history, oldest first.
    pub fn history_view(&self) -> Vec<CrowdReading> {
        self.read().history.snapshot_all()
    }

    /// The surge event log, oldest first.
    pub fn events_view(&self) -> Vec<EventLogEntry> {
        self.read().events.entries()
    }

    /// Snapshot, history and events copied under one read of the state.
    pub fn view(&self) -> StateView {
        let state = self.read();
        StateView {
            snapshot: state.snapshot.clone(),
            history: state.history.snapshot_all(),
            events: state.events.entries(),
        }
    }

    pub fn history_capacity(&self) -> usize {
        self.read().history.capacity()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped_malformed: self.counters.malformed.load(Ordering::Relaxed),
            dropped_missing_field: self.counters.missing_field.load(Ordering::Relaxed),
            dropped_invalid_value: self.counters.invalid_value.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    // The state is only ever replaced field-by-field inside one guard with no
    // fallible step in between, so a poisoned lock still holds a whole state.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ZoneStatus;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap()
    }

    fn payload(count: u64, status: &str, gate: &str) -> Vec<u8> {
        serde_json::json!({ "count": count, "status": status, "gate": gate })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_initial_state_is_sentinel() {
        let aggregator = StateAggregator::default();

        let snapshot = aggregator.current_snapshot();
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.reading.status, ZoneStatus::Offline);
        assert_eq!(snapshot.reading.gate, "N/A");
        assert!(aggregator.history_view().is_empty());
        assert!(aggregator.events_view().is_empty());
    }

    #[test]
    fn test_single_normal_reading() {
        let aggregator = StateAggregator::default();

        let revision = aggregator.ingest_at(&payload(5, "NORMAL", "LOCKED"), t0());

        assert_eq!(revision, Some(1));
        let snapshot = aggregator.current_snapshot();
        assert_eq!(snapshot.reading.count, 5);
        assert_eq!(snapshot.reading.status, ZoneStatus::Normal);
        assert_eq!(snapshot.reading.received_at, t0());
        assert_eq!(aggregator.history_view().len(), 1);
        assert!(aggregator.events_view().is_empty());
    }

    #[test]
    fn test_history_keeps_last_fifty() {
        let aggregator = StateAggregator::default();

        for i in 1..=51u64 {
            aggregator.ingest_at(&payload(i, "NORMAL", "LOCKED"), t0() + Duration::seconds(i as i64));
        }

        let history = aggregator.history_view();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].count, 2);
        assert_eq!(history[49].count, 51);
        assert_eq!(aggregator.current_snapshot().revision, 51);
    }

    #[test]
    fn test_duplicate_danger_logged_once() {
        let aggregator = StateAggregator::default();
        let surge = payload(120, "DANGER", "OPEN");

        aggregator.ingest_at(&surge, t0());
        aggregator.ingest_at(&surge, t0());

        assert_eq!(aggregator.events_view().len(), 1);
        assert_eq!(aggregator.history_view().len(), 2);
        assert!(aggregator.current_snapshot().is_alerting());
    }

    #[test]
    fn test_normal_between_dangers_records_both() {
        let aggregator = StateAggregator::default();
        let surge = payload(120, "DANGER", "OPEN");

        aggregator.ingest_at(&surge, t0());
        aggregator.ingest_at(&payload(40, "NORMAL", "LOCKED"), t0());
        aggregator.ingest_at(&surge, t0());

        let events = aggregator.events_view();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "[18:30:00] SURGE DETECTED: 120 PAX");
        assert_eq!(events[1].message, events[0].message);
    }

    #[test]
    fn test_missing_status_leaves_state_unchanged() {
        let aggregator = StateAggregator::default();
        aggregator.ingest_at(&payload(120, "DANGER", "OPEN"), t0());
        let before = aggregator.view();

        let revision = aggregator.ingest_at(br#"{"count": 9, "gate": "OPEN"}"#, t0());

        assert_eq!(revision, None);
        let after = aggregator.view();
        assert_eq!(after.snapshot, before.snapshot);
        assert_eq!(after.history, before.history);
        assert_eq!(after.events, before.events);
        assert_eq!(aggregator.stats().dropped_missing_field, 1);
    }

    #[test]
    fn test_drops_are_counted_by_kind() {
        let aggregator = StateAggregator::default();

        aggregator.ingest(b"{not json");
        aggregator.ingest(br#"{"count": -3, "status": "NORMAL", "gate": "OPEN"}"#);
        aggregator.ingest(br#"{"count": 3, "status": "RIOT", "gate": "OPEN"}"#);
        aggregator.ingest(br#"{"count": 3, "status": "NORMAL"}"#);
        aggregator.ingest(&payload(3, "WARNING", "LOCKED"));

        let stats = aggregator.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.dropped_malformed, 1);
        assert_eq!(stats.dropped_invalid_value, 2);
        assert_eq!(stats.dropped_missing_field, 1);
        assert_eq!(aggregator.current_snapshot().revision, 1);
    }

    #[test]
    fn test_revision_strictly_increases() {
        let aggregator = StateAggregator::default();
        let mut last = aggregator.current_snapshot().revision;

        for (i, raw) in [
            payload(1, "NORMAL", "LOCKED"),
            b"garbage".to_vec(),
            payload(2, "WARNING", "LOCKED"),
            br#"{"count": 1}"#.to_vec(),
            payload(3, "DANGER", "OPEN"),
        ]
        .iter()
        .enumerate()
        {
            let accepted = aggregator.ingest_at(raw, t0()).is_some();
            let revision = aggregator.current_snapshot().revision;
            if accepted {
                assert!(revision > last, "step {i}");
            } else {
                assert_eq!(revision, last, "step {i}");
            }
            last = revision;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_event_log_cap() {
        let aggregator = StateAggregator::new(AggregatorConfig {
            history_capacity: NonZeroUsize::new(5).unwrap(),
            event_log_cap: Some(NonZeroUsize::new(2).unwrap()),
        });

        for count in [100, 110, 120] {
            aggregator.ingest_at(&payload(count, "DANGER", "OPEN"), t0());
        }

        assert_eq!(aggregator.events_view().len(), 2);
        assert_eq!(aggregator.history_capacity(), 5);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let capacity = 8;
        let aggregator = Arc::new(StateAggregator::new(AggregatorConfig {
            history_capacity: NonZeroUsize::new(capacity).unwrap(),
            event_log_cap: None,
        }));
        let total = 2_000u64;

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    let mut last_revision = 0;
                    for _ in 0..2_000 {
                        let view = aggregator.view();
                        let revision = view.snapshot.revision;
                        assert!(revision >= last_revision);
                        last_revision = revision;

                        // Reading i carries count i, so revision == count.
                        assert_eq!(view.history.len() as u64, revision.min(capacity as u64));
                        if let Some(latest) = view.history.last() {
                            assert_eq!(latest, &view.snapshot.reading);
                            assert_eq!(latest.count, revision);
                        }
                        for pair in view.history.windows(2) {
                            assert_eq!(pair[0].count + 1, pair[1].count);
                        }
                        // Danger readings are every tenth count.
                        assert_eq!(view.events.len() as u64, revision / 10);

                        assert!(aggregator.history_view().len() <= capacity);
                    }
                })
            })
            .collect();

        let writer = {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for i in 1..=total {
                    let status = if i % 10 == 0 { "DANGER" } else { "NORMAL" };
                    aggregator.ingest_at(&payload(i, status, "OPEN"), t0());
                }
            })
        };

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(aggregator.current_snapshot().revision, total);
        assert_eq!(aggregator.events_view().len() as u64, total / 10);
    }
}
