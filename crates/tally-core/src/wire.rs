//! Wire encoding for the per-user remote document.
//!
//! Timestamps are written as ISO-8601 strings with millisecond precision and a
//! `Z` suffix. On read the decoder also accepts epoch milliseconds and the
//! remote store's native `{seconds, nanoseconds}` objects, wherever they
//! appear. Optional values are always written, as `null` when absent, since
//! the remote store has no notion of a missing value.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

use crate::store::CloudDocument;
use crate::Result;

/// Top-level document keys owned by the sync engine.
pub const DOCUMENT_KEYS: [&str; 3] = ["books", "entries", "categories"];

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
    Native {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(alias = "_nanoseconds", default)]
        nanoseconds: u32,
    },
}

impl RawTimestamp {
    fn into_datetime(self) -> std::result::Result<DateTime<Utc>, String> {
        match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|value| value.with_timezone(&Utc))
                .map_err(|error| format!("invalid ISO-8601 timestamp '{text}': {error}")),
            Self::Millis(millis) => Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| format!("timestamp out of range: {millis}")),
            Self::Native {
                seconds,
                nanoseconds,
            } => Utc
                .timestamp_opt(seconds, nanoseconds)
                .single()
                .ok_or_else(|| format!("timestamp out of range: {seconds}s {nanoseconds}ns")),
        }
    }
}

/// Format a timestamp the way it travels on the wire.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter for required timestamp fields.
pub mod timestamp {
    use super::{format_timestamp, DateTime, Deserialize, Deserializer, RawTimestamp, Serializer, Utc};
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        RawTimestamp::deserialize(deserializer)?
            .into_datetime()
            .map_err(D::Error::custom)
    }
}

/// Serde adapter for optional timestamp fields; `null` and missing both read as `None`.
pub mod timestamp_option {
    use super::{format_timestamp, DateTime, Deserialize, Deserializer, RawTimestamp, Serializer, Utc};
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&format_timestamp(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<RawTimestamp>::deserialize(deserializer)?
            .map(RawTimestamp::into_datetime)
            .transpose()
            .map_err(D::Error::custom)
    }
}

/// Encode the engine-owned part of the remote document.
pub fn encode_document(document: &CloudDocument) -> Result<Value> {
    Ok(serde_json::to_value(document)?)
}

/// Decode a remote document, ignoring fields the engine does not own.
pub fn decode_document(value: Value) -> Result<CloudDocument> {
    Ok(serde_json::from_value(value)?)
}

/// Merge-style write: replace the engine-owned keys and keep everything else.
pub fn merge_into_document(existing: Option<Value>, update: Value) -> Value {
    let mut target = match existing {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(update) = update {
        for (key, value) in update {
            target.insert(key, value);
        }
    }
    Value::Object(target)
}

/// Parse a timestamp from any supported wire representation.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    RawTimestamp::deserialize(value)
        .map_err(serde_json::Error::custom)?
        .into_datetime()
        .map_err(|message| serde_json::Error::custom(message).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Book, Syncable};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn timestamps_are_written_with_millisecond_precision() {
        let value = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(format_timestamp(&value), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn parse_timestamp_accepts_all_wire_shapes() {
        let expected = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(
            parse_timestamp(&json!("2023-11-14T22:13:20.000Z")).unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp(&json!("2023-11-15T00:13:20+02:00")).unwrap(),
            expected
        );
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000_i64)).unwrap(), expected);
        assert_eq!(
            parse_timestamp(&json!({"seconds": 1_700_000_000, "nanoseconds": 0})).unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp(&json!({"_seconds": 1_700_000_000, "_nanoseconds": 0})).unwrap(),
            expected
        );
        assert!(parse_timestamp(&json!("yesterday")).is_err());
    }

    #[test]
    fn absent_values_are_written_as_null() {
        let book = Book::new("Trip", "EUR", "device-a");
        let document = CloudDocument {
            books: vec![book],
            ..CloudDocument::default()
        };
        let encoded = encode_document(&document).unwrap();
        let first = &encoded["books"][0];
        assert_eq!(first["deletedAt"], Value::Null);
        assert_eq!(first["lastSyncedVersion"], Value::Null);
        assert!(first.as_object().unwrap().contains_key("archivedAt"));
    }

    #[test]
    fn decode_reads_native_timestamps_in_nested_records() {
        let payload = json!({
            "owner": "someone-else",
            "books": [{
                "id": "b1",
                "name": "Trip",
                "currency": "EUR",
                "archived": false,
                "archivedAt": null,
                "version": 2,
                "lastSyncedVersion": null,
                "lastModifiedBy": "device-b",
                "createdAt": {"_seconds": 1_700_000_000, "_nanoseconds": 0},
                "updatedAt": 1_700_000_100_000_i64,
                "deleted": false
            }]
        });

        let document = decode_document(payload).unwrap();
        assert_eq!(document.books.len(), 1);
        let book = &document.books[0];
        assert_eq!(book.meta().version, 2);
        assert_eq!(
            book.meta().updated_at,
            Utc.timestamp_millis_opt(1_700_000_100_000).single()
        );
        assert_eq!(book.meta().deleted_at, None);
        assert!(document.entries.is_empty());
    }

    #[test]
    fn merge_write_keeps_unrelated_fields() {
        let existing = json!({"owner": "u1", "books": [1], "profile": {"theme": "dark"}});
        let merged = merge_into_document(Some(existing), json!({"books": [], "entries": []}));
        assert_eq!(
            merged,
            json!({"owner": "u1", "books": [], "entries": [], "profile": {"theme": "dark"}})
        );
    }
}
