//! Data models for CrowdGuard.
//!
//! Every type handed to a reader is an owned copy. Nothing in this module
//! exposes a reference into the aggregator's live state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gate label shown before any reading has arrived.
pub const NO_GATE: &str = "N/A";

/// Zone status reported by the crowd sensor.
///
/// Wire form is the upper-case tag as published (`"NORMAL"`, `"DANGER"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneStatus {
    /// Occupancy within normal bounds.
    Normal,

    /// Occupancy approaching the safe limit.
    Warning,

    /// Crowd surge. Drives the event log and the alert banner.
    Danger,

    /// No live data. Also the sentinel state before the first reading.
    Offline,
}

impl ZoneStatus {
    /// The wire tag for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneStatus::Normal => "NORMAL",
            ZoneStatus::Warning => "WARNING",
            ZoneStatus::Danger => "DANGER",
            ZoneStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status tag is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown zone status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ZoneStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(ZoneStatus::Normal),
            "WARNING" => Ok(ZoneStatus::Warning),
            "DANGER" => Ok(ZoneStatus::Danger),
            "OFFLINE" => Ok(ZoneStatus::Offline),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A single validated telemetry sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdReading {
    /// Current people count in the zone.
    pub count: u64,

    /// Zone status as reported by the sensor.
    pub status: ZoneStatus,

    /// Gate/lock state label, e.g. "LOCKED" or "OPEN".
    pub gate: String,

    /// Server-side arrival time. Never taken from the payload.
    pub received_at: DateTime<Utc>,
}

impl CrowdReading {
    /// The sentinel reading used before anything has been ingested.
    pub fn offline(at: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            status: ZoneStatus::Offline,
            gate: NO_GATE.to_string(),
            received_at: at,
        }
    }
}

/// The live reading plus its revision.
///
/// Revision 0 is the sentinel; each accepted reading bumps it by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub reading: CrowdReading,
    pub revision: u64,
}

impl Snapshot {
    /// Whether the live zone is in a surge (the critical alert banner condition).
    pub fn is_alerting(&self) -> bool {
        self.reading.status == ZoneStatus::Danger
    }

    /// Whether any reading has been accepted yet.
    pub fn is_sentinel(&self) -> bool {
        self.revision == 0
    }
}

/// One line in the surge event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Snapshot, history and events captured from the same update cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub snapshot: Snapshot,
    pub history: Vec<CrowdReading>,
    pub events: Vec<EventLogEntry>,
}

/// Ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Readings accepted into the state.
    pub accepted: u64,

    /// Payloads that were not valid JSON objects.
    pub dropped_malformed: u64,

    /// Payloads missing a required field.
    pub dropped_missing_field: u64,

    /// Payloads with a field outside its domain.
    pub dropped_invalid_value: u64,

    /// Seconds since the aggregator was constructed.
    pub uptime_secs: u64,
}

impl IngestStats {
    /// Total payloads dropped for any reason.
    pub fn dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_missing_field + self.dropped_invalid_value
    }
}

/// Response for GET /health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub revision: u64,

    /// No reading has been accepted yet; the snapshot is the OFFLINE sentinel.
    pub awaiting_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_status_parse() {
        assert_eq!("NORMAL".parse::<ZoneStatus>(), Ok(ZoneStatus::Normal));
        assert_eq!("WARNING".parse::<ZoneStatus>(), Ok(ZoneStatus::Warning));
        assert_eq!("DANGER".parse::<ZoneStatus>(), Ok(ZoneStatus::Danger));
        assert_eq!("OFFLINE".parse::<ZoneStatus>(), Ok(ZoneStatus::Offline));
    }

    #[test]
    fn test_zone_status_parse_is_case_sensitive() {
        assert_eq!(
            "danger".parse::<ZoneStatus>(),
            Err(UnknownStatus("danger".to_string()))
        );
        assert!("PANIC".parse::<ZoneStatus>().is_err());
    }

    #[test]
    fn test_zone_status_serializes_as_wire_tag() {
        let json = serde_json::to_string(&ZoneStatus::Danger).unwrap();
        assert_eq!(json, "\"DANGER\"");
        assert_eq!(ZoneStatus::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_sentinel_snapshot() {
        let snapshot = Snapshot {
            reading: CrowdReading::offline(Utc::now()),
            revision: 0,
        };

        assert!(snapshot.is_sentinel());
        assert!(!snapshot.is_alerting());
        assert_eq!(snapshot.reading.gate, NO_GATE);
        assert_eq!(snapshot.reading.count, 0);
    }

    #[test]
    fn test_dropped_total() {
        let stats = IngestStats {
            accepted: 4,
            dropped_malformed: 1,
            dropped_missing_field: 2,
            dropped_invalid_value: 3,
            uptime_secs: 0,
        };
        assert_eq!(stats.dropped(), 6);
    }
}
