//! Telemetry payload decoding.
//!
//! Turns a raw broker payload into a validated [`CrowdReading`]. Decoding is
//! pure: the arrival time is supplied by the caller and any timestamp in the
//! payload itself is ignored.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::{CrowdReading, ZoneStatus};

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Coarse classification of a [`DecodeError`], used for counters and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    Malformed,
    MissingField,
    InvalidValue,
}

impl DecodeError {
    pub fn kind(&self) -> DecodeErrorKind {
        match self {
            DecodeError::Malformed(_) => DecodeErrorKind::Malformed,
            DecodeError::MissingField(_) => DecodeErrorKind::MissingField,
            DecodeError::InvalidValue { .. } => DecodeErrorKind::InvalidValue,
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Decode a raw payload of the form `{"count": 5, "status": "NORMAL", "gate": "LOCKED"}`.
///
/// Fields are checked in the order `count`, `status`, `gate` and the first
/// failure is returned. Unknown fields are ignored.
pub fn decode(raw: &[u8], received_at: DateTime<Utc>) -> Result<CrowdReading, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(DecodeError::Malformed(
            "top-level value is not an object".to_string(),
        ));
    };

    let count = decode_count(&fields)?;
    let status = decode_status(&fields)?;
    let gate = required(&fields, "gate")?
        .as_str()
        .ok_or_else(|| DecodeError::invalid("gate", "expected a string"))?
        .to_string();

    Ok(CrowdReading {
        count,
        status,
        gate,
        received_at,
    })
}

fn required<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, DecodeError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn decode_count(fields: &Map<String, Value>) -> Result<u64, DecodeError> {
    let value = required(fields, "count")?;
    let Value::Number(n) = value else {
        return Err(DecodeError::invalid("count", "expected an integer"));
    };

    if let Some(count) = n.as_u64() {
        return Ok(count);
    }
    if n.as_i64().is_some() {
        return Err(DecodeError::invalid("count", format!("negative count {n}")));
    }

    // Integers outside i64/u64 and `-0` arrive as floats.
    match n.as_f64() {
        Some(f) if f == 0.0 => Ok(0),
        Some(f) if f.fract() == 0.0 && f >= U64_LIMIT => {
            Err(DecodeError::invalid("count", format!("count out of range {n}")))
        }
        Some(f) if f.fract() == 0.0 && f < 0.0 => {
            Err(DecodeError::invalid("count", format!("negative count {n}")))
        }
        _ => Err(DecodeError::invalid("count", format!("non-integer count {n}"))),
    }
}

/// 2^64 as a float; any integral float at or above this does not fit a `u64`.
const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

fn decode_status(fields: &Map<String, Value>) -> Result<ZoneStatus, DecodeError> {
    required(fields, "status")?
        .as_str()
        .ok_or_else(|| DecodeError::invalid("status", "expected a string"))?
        .parse::<ZoneStatus>()
        .map_err(|e| DecodeError::invalid("status", e.to_string()))
}
