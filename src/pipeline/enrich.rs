use crate::constants::{FIELD_DATA_TYPE, FIELD_TIMESTAMP};
use crate::types::{FeedKind, StationRecord};
use serde_json::Value;

/// Append ingestion metadata to a validated record. Values already supplied
/// upstream are left as they are.
pub fn enrich(mut record: StationRecord, kind: FeedKind, ingested_at: i64) -> StationRecord {
    record
        .entry(FIELD_TIMESTAMP)
        .or_insert_with(|| Value::from(ingested_at));
    record
        .entry(FIELD_DATA_TYPE)
        .or_insert_with(|| Value::from(kind.as_str()));
    record
}
