//! Conversion of database rows into JSON-safe snapshot rows.
//!
//! Rows are read with `row_to_json`, so PostgreSQL has already rendered
//! dates and timestamps as ISO-8601 strings by the time they get here.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Column name to JSON value, exactly as dumped.
pub type SnapshotRow = Map<String, Value>;

/// Turn whatever the driver returned for one row into a snapshot row.
///
/// Never fails: objects pass through untouched, `null` becomes an empty row
/// and a bare scalar is kept under a `value` key.
pub fn into_snapshot_row(value: Value) -> SnapshotRow {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut row = Map::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

/// Lenient view of a captured table: anything that is not an array of
/// objects contributes no rows.
pub fn rows_of(value: &Value) -> Vec<&SnapshotRow> {
    value
        .as_array()
        .map(|rows| rows.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

/// ISO-8601 with millisecond precision, as stored in ledgers and payloads.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO timestamp safe for filenames: `2024-03-05T14-07-09-000Z`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    iso_timestamp(at).replace([':', '.'], "-")
}

pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}
