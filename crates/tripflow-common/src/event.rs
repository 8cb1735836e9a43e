//! Upload notifications and their normalized form
//!
//! Object stores announce new uploads in two shapes:
//!
//! - an event-bus envelope: `{"detail": {"bucket": {"name"}, "object": {"key"}}}`
//! - a notification list: `{"Records": [{"s3": {"bucket": {"name"}, "object": {"key"}}}]}`
//!
//! Both are reduced to an [`IngestionEvent`]. The envelope is tried first and
//! the list is the fallback; a payload that yields no bucket or no key in
//! either shape is rejected with [`EventError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Validation failure while normalizing a notification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("event body must be a JSON object")]
    NotAnObject,

    #[error("missing bucket/key in event")]
    MissingBucketOrKey,
}

/// A single object upload, reduced to where it lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub bucket: String,
    pub key: String,
}

impl IngestionEvent {
    /// Build an event, rejecting empty fields
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, EventError> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || key.is_empty() {
            return Err(EventError::MissingBucketOrKey);
        }
        Ok(Self { bucket, key })
    }

    /// Normalize a raw notification body
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        Self::normalize(&value)
    }

    /// Normalize a parsed notification.
    ///
    /// Only the first entry of a `Records` list is considered here; use
    /// [`IngestionEvent::from_records`] to walk all of them.
    pub fn normalize(value: &Value) -> Result<Self, EventError> {
        if !value.is_object() {
            return Err(EventError::NotAnObject);
        }

        let nested = (
            non_empty_str(value, "/detail/bucket/name"),
            non_empty_str(value, "/detail/object/key"),
        );
        if let (Some(bucket), Some(key)) = nested {
            return Self::new(bucket, key);
        }

        match value.pointer("/Records/0") {
            Some(record) => Self::from_record(record),
            None => Err(EventError::MissingBucketOrKey),
        }
    }

    /// Normalize every entry of a `Records` list, preserving order.
    ///
    /// A payload without a `Records` array yields an empty list.
    pub fn from_records(value: &Value) -> Vec<Result<Self, EventError>> {
        value
            .get("Records")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(Self::from_record).collect())
            .unwrap_or_default()
    }

    fn from_record(record: &Value) -> Result<Self, EventError> {
        match (
            non_empty_str(record, "/s3/bucket/name"),
            non_empty_str(record, "/s3/object/key"),
        ) {
            (Some(bucket), Some(key)) => Self::new(bucket, key),
            _ => Err(EventError::MissingBucketOrKey),
        }
    }

    /// Fully-qualified object URI, e.g. `s3://trips/2024/01/rides.csv`
    pub fn object_uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.bucket, self.key)
    }

    /// Parse `s3://bucket/key` or `s3a://bucket/key` back into an event
    pub fn parse_object_uri(uri: &str) -> Option<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .or_else(|| uri.strip_prefix("s3a://"))?;
        let (bucket, key) = rest.split_once('/')?;
        Self::new(bucket, key).ok()
    }

    /// Lower-cased extension of the key's last path segment
    pub fn extension(&self) -> Option<String> {
        let name = self.key.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl std::fmt::Display for IngestionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

fn non_empty_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn nested(bucket: &str, key: &str) -> Value {
        json!({
            "source": "aws.s3",
            "detail-type": "Object Created",
            "detail": { "bucket": { "name": bucket }, "object": { "key": key, "size": 12 } }
        })
    }

    fn flat(bucket: &str, key: &str) -> Value {
        json!({
            "Records": [
                { "eventName": "ObjectCreated:Put",
                  "s3": { "bucket": { "name": bucket }, "object": { "key": key } } }
            ]
        })
    }

    #[test]
    fn test_nested_shape() {
        let event = IngestionEvent::normalize(&nested("trips", "2024/01/rides.csv")).unwrap();
        assert_eq!(event, IngestionEvent::new("trips", "2024/01/rides.csv").unwrap());
    }

    #[test]
    fn test_flat_shape() {
        let event = IngestionEvent::normalize(&flat("trips", "2024/01/rides.csv")).unwrap();
        assert_eq!(event.bucket, "trips");
        assert_eq!(event.key, "2024/01/rides.csv");
    }

    #[test]
    fn test_nested_wins_over_flat() {
        let mut body = flat("other", "other.csv");
        body["detail"] = nested("trips", "a.csv")["detail"].clone();
        let event = IngestionEvent::normalize(&body).unwrap();
        assert_eq!(event.bucket, "trips");
    }

    #[test]
    fn test_partial_nested_falls_back_to_flat() {
        let mut body = flat("trips", "a.csv");
        body["detail"] = json!({ "bucket": { "name": "ignored" } });
        let event = IngestionEvent::normalize(&body).unwrap();
        assert_eq!(event, IngestionEvent::new("trips", "a.csv").unwrap());
    }

    #[test]
    fn test_missing_fields_rejected() {
        for body in [
            json!({}),
            json!({ "detail": {} }),
            json!({ "Records": [] }),
            json!({ "Records": [{ "s3": { "bucket": { "name": "trips" } } }] }),
            json!({ "detail": { "bucket": { "name": "" }, "object": { "key": "a.csv" } } }),
            json!({ "detail": { "bucket": { "name": 7 }, "object": { "key": "a.csv" } } }),
        ] {
            assert_eq!(
                IngestionEvent::normalize(&body),
                Err(EventError::MissingBucketOrKey),
                "body: {body}"
            );
        }
    }

    #[test]
    fn test_non_object_and_bad_json() {
        assert_eq!(IngestionEvent::normalize(&json!([1, 2])), Err(EventError::NotAnObject));
        assert!(matches!(
            IngestionEvent::from_slice(b"{not json"),
            Err(EventError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_from_records_keeps_order_and_failures() {
        let body = json!({
            "Records": [
                { "s3": { "bucket": { "name": "b" }, "object": { "key": "1.csv" } } },
                { "s3": { "bucket": { "name": "b" } } },
                { "s3": { "bucket": { "name": "b" }, "object": { "key": "3.csv" } } }
            ]
        });
        let events = IngestionEvent::from_records(&body);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap().key, "1.csv");
        assert!(events[1].is_err());
        assert_eq!(events[2].as_ref().unwrap().key, "3.csv");
        assert!(IngestionEvent::from_records(&json!({})).is_empty());
    }

    #[test]
    fn test_object_uri_round_trip() {
        let event = IngestionEvent::new("trips", "2024/01/rides.csv").unwrap();
        assert_eq!(event.object_uri("s3a"), "s3a://trips/2024/01/rides.csv");
        assert_eq!(
            IngestionEvent::parse_object_uri("s3://trips/2024/01/rides.csv"),
            Some(event)
        );
        assert_eq!(IngestionEvent::parse_object_uri("s3://trips"), None);
        assert_eq!(IngestionEvent::parse_object_uri("/mnt/efs/rides.csv"), None);
    }

    #[test]
    fn test_extension() {
        let ext = |key: &str| IngestionEvent::new("b", key).unwrap().extension();
        assert_eq!(ext("2024/01/rides.CSV"), Some("csv".to_string()));
        assert_eq!(ext("2024/01/rides"), None);
        assert_eq!(ext("2024.01/rides"), None);
        assert_eq!(ext(".csv"), None);
    }

    proptest! {
        #[test]
        fn both_shapes_normalize_identically(
            bucket in "[a-z0-9][a-z0-9.-]{0,20}",
            key in "[A-Za-z0-9_/.-]{1,40}",
        ) {
            let a = IngestionEvent::normalize(&nested(&bucket, &key)).unwrap();
            let b = IngestionEvent::normalize(&flat(&bucket, &key)).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.bucket, bucket);
            prop_assert_eq!(a.key, key);
        }
    }
}
