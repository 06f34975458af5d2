//! Record types persisted by the simulated store
//!
//! Each record lives under its own storage key as a versioned JSON envelope:
//!
//! ```json
//! {"version": 1, "data": ["evt-1", "evt-2"]}
//! ```
//!
//! Bare payloads without an envelope are still accepted on read. Anything that
//! fails to parse is logged and read as absent so one bad key cannot break
//! unrelated reads.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::types::Result;

/// Current envelope version
pub const SCHEMA_VERSION: u32 = 1;

/// Logical records and their storage keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Record {
    DeletedEvents,
    CancelledEvents,
    MemoryPosts,
    JoinedGroups,
    PendingGroupRequests,
    UserUpdates,
}

impl Record {
    pub const ALL: [Record; 6] = [
        Record::DeletedEvents,
        Record::CancelledEvents,
        Record::MemoryPosts,
        Record::JoinedGroups,
        Record::PendingGroupRequests,
        Record::UserUpdates,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Record::DeletedEvents => "simulated_deleted_events",
            Record::CancelledEvents => "simulated_cancelled_events",
            Record::MemoryPosts => "simulated_memory_posts",
            Record::JoinedGroups => "simulated_joined_groups",
            Record::PendingGroupRequests => "simulated_pending_group_requests",
            Record::UserUpdates => "simulated_user_updates",
        }
    }
}

/// How readers combine durable and session data in session mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Session data layered over durable data (session wins on collisions)
    #[default]
    Overlay,
    /// Only the storage the active mode writes to
    ActiveOnly,
}

// =============================================================================
// Payloads
// =============================================================================

/// Cancellation marker for an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledEvent {
    pub message: String,
    /// Written as RFC 3339; epoch milliseconds are accepted on read
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(DateTime<Utc>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(at) => Ok(at),
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
        }
    }
}

/// User-authored memory post; only `id` is interpreted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryPost {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MemoryPost {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut fields = fields;
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Shallow-merge `patch` into the post. The id never changes.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (field, value) in patch {
            if field != "id" {
                self.fields.insert(field.clone(), value.clone());
            }
        }
    }
}

pub type CancelledEvents = BTreeMap<String, CancelledEvent>;

// =============================================================================
// Encoding
// =============================================================================

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Serialize `data` into the current envelope
pub fn encode<T: Serialize>(data: &T) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        version: SCHEMA_VERSION,
        data,
    })?)
}

/// Parse a stored value, returning `None` (with a warning) when unusable
pub fn decode<T: DeserializeOwned>(record: Record, raw: &str) -> Option<T> {
    if let Ok(envelope) = serde_json::from_str::<Envelope<T>>(raw) {
        if envelope.version == SCHEMA_VERSION {
            return Some(envelope.data);
        }
        warn!(
            key = record.key(),
            version = envelope.version,
            "Unsupported record version, ignoring"
        );
        return None;
    }

    match serde_json::from_str::<T>(raw) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!(key = record.key(), error = %e, "Unparseable record, ignoring");
            None
        }
    }
}

// =============================================================================
// Merging
// =============================================================================

/// Order-preserving union of id lists
pub fn union_ids(base: Vec<String>, overlay: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    base.into_iter()
        .chain(overlay)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Concatenate post lists, keeping the first post seen for each id
pub fn concat_posts(base: Vec<MemoryPost>, overlay: Vec<MemoryPost>) -> Vec<MemoryPost> {
    let mut seen = HashSet::new();
    base.into_iter()
        .chain(overlay)
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_wraps_in_envelope() {
        let raw = encode(&vec!["a".to_string()]).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"version": 1, "data": ["a"]}));
    }

    #[test]
    fn test_decode_accepts_bare_payload() {
        let ids: Option<Vec<String>> = decode(Record::DeletedEvents, r#"["e1","e2"]"#);
        assert_eq!(ids, Some(vec!["e1".to_string(), "e2".to_string()]));
    }

    #[test]
    fn test_decode_is_fail_soft() {
        let ids: Option<Vec<String>> = decode(Record::DeletedEvents, "{not json");
        assert!(ids.is_none());

        let wrong_shape: Option<Vec<String>> = decode(Record::DeletedEvents, r#"{"a":1}"#);
        assert!(wrong_shape.is_none());
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let ids: Option<Vec<String>> =
            decode(Record::JoinedGroups, r#"{"version": 99, "data": ["g1"]}"#);
        assert!(ids.is_none());
    }

    #[test]
    fn test_union_ids_dedups_in_order() {
        let merged = union_ids(
            vec!["a".into(), "b".into()],
            vec!["b".into(), "c".into(), "a".into()],
        );
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_memory_post_patch_keeps_id() {
        let mut post = MemoryPost::new("p1", json!({"caption": "old"}).as_object().unwrap().clone());
        post.apply_patch(json!({"id": "p2", "caption": "new", "likes": 3}).as_object().unwrap());

        assert_eq!(post.id, "p1");
        assert_eq!(post.fields.get("caption"), Some(&json!("new")));
        assert_eq!(post.fields.get("likes"), Some(&json!(3)));
    }

    #[test]
    fn test_cancelled_event_reads_epoch_millis() {
        let raw = r#"{"e1": {"message": "rain", "timestamp": 1700000000000}}"#;
        let cancelled: Option<CancelledEvents> = decode(Record::CancelledEvents, raw);
        let cancelled = cancelled.unwrap();

        assert_eq!(cancelled["e1"].message, "rain");
        assert_eq!(cancelled["e1"].timestamp.timestamp_millis(), 1_700_000_000_000);

        let written = serde_json::to_value(&cancelled["e1"]).unwrap();
        assert!(written["timestamp"].is_string());
        let reread: CancelledEvent = serde_json::from_value(written).unwrap();
        assert_eq!(reread, cancelled["e1"]);
    }

    #[test]
    fn test_memory_post_flattened_json() {
        let post: MemoryPost =
            serde_json::from_value(json!({"id": "p1", "caption": "sunset"})).unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            json!({"id": "p1", "caption": "sunset"})
        );
    }
}
