//! Fixed trip record schema
//!
//! Columns are matched by position, the header line (when present) is only
//! skipped. Every field is parsed by its own function that yields `None` on a
//! type mismatch, so a malformed value nulls that column and the row survives.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ByteRecord;
use serde::Serialize;

/// Declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Timestamp,
    Float,
    Text,
    Boolean,
}

/// Input columns in file order, with their sink column names
pub const COLUMNS: [(&str, &str, ColumnType); 19] = [
    ("VendorID", "vendor_id", ColumnType::Integer),
    ("tpep_pickup_datetime", "tpep_pickup_datetime", ColumnType::Timestamp),
    ("tpep_dropoff_datetime", "tpep_dropoff_datetime", ColumnType::Timestamp),
    ("passenger_count", "passenger_count", ColumnType::Integer),
    ("trip_distance", "trip_distance", ColumnType::Float),
    ("pickup_longitude", "pickup_longitude", ColumnType::Text),
    ("pickup_latitude", "pickup_latitude", ColumnType::Text),
    ("RateCodeID", "rate_code_id", ColumnType::Integer),
    ("store_and_fwd_flag", "store_and_fwd_flag", ColumnType::Boolean),
    ("dropoff_longitude", "dropoff_longitude", ColumnType::Text),
    ("dropoff_latitude", "dropoff_latitude", ColumnType::Text),
    ("payment_type", "payment_type", ColumnType::Integer),
    ("fare_amount", "fare_amount", ColumnType::Float),
    ("extra", "extra", ColumnType::Float),
    ("mta_tax", "mta_tax", ColumnType::Float),
    ("tip_amount", "tip_amount", ColumnType::Float),
    ("tolls_amount", "tolls_amount", ColumnType::Float),
    ("improvement_surcharge", "improvement_surcharge", ColumnType::Float),
    ("total_amount", "total_amount", ColumnType::Float),
];

/// One input row after schema enforcement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TripRecord {
    pub vendor_id: Option<i32>,
    pub pickup_datetime: Option<NaiveDateTime>,
    pub dropoff_datetime: Option<NaiveDateTime>,
    pub passenger_count: Option<i32>,
    pub trip_distance: Option<f32>,
    pub pickup_longitude: Option<String>,
    pub pickup_latitude: Option<String>,
    pub rate_code_id: Option<i32>,
    pub store_and_fwd_flag: Option<bool>,
    pub dropoff_longitude: Option<String>,
    pub dropoff_latitude: Option<String>,
    pub payment_type: Option<i32>,
    pub fare_amount: Option<f32>,
    pub extra: Option<f32>,
    pub mta_tax: Option<f32>,
    pub tip_amount: Option<f32>,
    pub tolls_amount: Option<f32>,
    pub improvement_surcharge: Option<f32>,
    pub total_amount: Option<f32>,
}

impl TripRecord {
    /// Build a record from raw fields. Missing trailing fields are null and
    /// extra fields are ignored.
    pub fn from_byte_record(record: &ByteRecord) -> Self {
        let field = |i: usize| record.get(i).map(String::from_utf8_lossy);
        let int = |i| field(i).and_then(|v| parse_int(&v));
        let float = |i| field(i).and_then(|v| parse_float(&v));
        let text = |i| field(i).and_then(|v| parse_text(&v));
        let ts = |i| field(i).and_then(|v| parse_timestamp(&v));

        Self {
            vendor_id: int(0),
            pickup_datetime: ts(1),
            dropoff_datetime: ts(2),
            passenger_count: int(3),
            trip_distance: float(4),
            pickup_longitude: text(5),
            pickup_latitude: text(6),
            rate_code_id: int(7),
            store_and_fwd_flag: field(8).and_then(|v| parse_bool(&v)),
            dropoff_longitude: text(9),
            dropoff_latitude: text(10),
            payment_type: int(11),
            fare_amount: float(12),
            extra: float(13),
            mta_tax: float(14),
            tip_amount: float(15),
            tolls_amount: float(16),
            improvement_surcharge: float(17),
            total_amount: float(18),
        }
    }
}

pub fn parse_int(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

pub fn parse_float(raw: &str) -> Option<f32> {
    raw.trim().parse().ok()
}

/// Empty strings are null
pub fn parse_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `true`/`false` plus the `Y`/`N` flags used by trip feeds, case-insensitive
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "y" | "yes" | "1" => Some(true),
        "false" | "f" | "n" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]`, the `T`-separated form, RFC 3339 with
/// an offset (converted to UTC) and a bare date (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
