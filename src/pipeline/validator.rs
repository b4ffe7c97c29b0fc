//! Record validation for both station feeds.
//!
//! Validation is a pure check over the raw JSON record. Malformed input is a
//! rejection with a reason, never a panic or an error value.

use crate::constants::FIELD_STATION_ID;
use crate::types::FeedKind;
use serde_json::{Map, Value};

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Accepted,
    Rejected(String),
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Validation::Accepted => None,
            Validation::Rejected(reason) => Some(reason),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Validation::Rejected(reason.into())
    }
}

const INFORMATION_FIELDS: [&str; 4] = [FIELD_STATION_ID, "name", "lat", "lon"];
const STATUS_FIELDS: [&str; 3] = [FIELD_STATION_ID, "num_bikes_available", "num_docks_available"];

pub fn validate(record: &Value, kind: FeedKind) -> Validation {
    let Some(fields) = record.as_object() else {
        return Validation::reject("record is not a JSON object");
    };

    match kind {
        FeedKind::StationInformation => validate_information(fields),
        FeedKind::StationStatus => validate_status(fields),
    }
}

fn validate_information(fields: &Map<String, Value>) -> Validation {
    if let Some(rejection) = missing_fields(fields, &INFORMATION_FIELDS) {
        return rejection;
    }
    if coerce_station_id(&fields[FIELD_STATION_ID]).is_none() {
        return Validation::reject("station_id is empty");
    }
    if !fields["name"].is_string() {
        return Validation::reject("name is not a string");
    }

    for (field, bound) in [("lat", 90.0), ("lon", 180.0)] {
        match coerce_f64(&fields[field]) {
            None => return Validation::reject(format!("{field} is not numeric")),
            Some(v) if !(-bound..=bound).contains(&v) => {
                return Validation::reject(format!("{field} {v} outside [-{bound}, {bound}]"));
            }
            Some(_) => {}
        }
    }

    Validation::Accepted
}

fn validate_status(fields: &Map<String, Value>) -> Validation {
    if let Some(rejection) = missing_fields(fields, &STATUS_FIELDS) {
        return rejection;
    }
    if coerce_station_id(&fields[FIELD_STATION_ID]).is_none() {
        return Validation::reject("station_id is empty");
    }

    for field in ["num_bikes_available", "num_docks_available"] {
        match coerce_i64(&fields[field]) {
            None => return Validation::reject(format!("{field} is not an integer")),
            Some(v) if v < 0 => return Validation::reject(format!("{field} is negative ({v})")),
            Some(_) => {}
        }
    }

    Validation::Accepted
}

/// Null counts as absent.
fn missing_fields(fields: &Map<String, Value>, required: &[&str]) -> Option<Validation> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| fields.get(*name).map_or(true, Value::is_null))
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(Validation::reject(format!("missing {}", missing.join("/"))))
    }
}

/// Station identifiers are opaque; strings and numbers are both accepted.
pub fn coerce_station_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Integers, integral floats (`5.0`) and integer strings (`"5"`). Booleans are
/// not integers.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Best-effort identifier for log lines about a record.
pub fn record_station_id(record: &Value) -> Option<String> {
    record.get(FIELD_STATION_ID).and_then(coerce_station_id)
}
