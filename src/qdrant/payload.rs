//! Helpers for constructing, hashing, and reading record payloads.

use crate::qdrant::types::{ScoredRecord, StoredRecord};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Payload key holding the caller-visible primary key.
pub const PK_FIELD: &str = "pk";
/// Payload key holding the record text.
pub const TEXT_FIELD: &str = "text";
/// Payload key holding the open metadata map.
pub const METADATA_FIELD: &str = "metadata";
const UPDATED_AT_FIELD: &str = "updated_at";

/// Build the payload object stored alongside each record.
pub(crate) fn build_payload(
    pk: &str,
    text: &str,
    metadata: &Map<String, Value>,
    timestamp_rfc3339: &str,
) -> Value {
    let mut payload = Map::new();
    payload.insert(PK_FIELD.into(), Value::String(pk.to_string()));
    payload.insert(TEXT_FIELD.into(), Value::String(text.to_string()));
    payload.insert(METADATA_FIELD.into(), Value::Object(metadata.clone()));
    payload.insert(
        UPDATED_AT_FIELD.into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    Value::Object(payload)
}

/// Compute a deterministic SHA-256 hash of the text, hex encoded.
///
/// Used as the primary key when the caller does not supply one.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Qdrant only accepts UUIDs or integers as point ids, so primary keys map through UUID v5.
pub fn point_id_for_pk(pk: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, pk.as_bytes()).to_string()
}

/// Physical Qdrant collection backing `name` inside application `app_id`.
pub fn collection_namespace(app_id: &str, name: &str) -> String {
    format!("{app_id}_{name}")
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn stored_record_from_payload(id: Value, payload: Option<Map<String, Value>>) -> StoredRecord {
    let (pk, text, metadata) = split_payload(id, payload);
    StoredRecord { pk, text, metadata }
}

pub(crate) fn scored_record_from_payload(
    id: Value,
    score: f32,
    payload: Option<Map<String, Value>>,
) -> ScoredRecord {
    let (pk, text, metadata) = split_payload(id, payload);
    ScoredRecord {
        pk,
        score,
        text,
        metadata,
    }
}

fn split_payload(
    id: Value,
    payload: Option<Map<String, Value>>,
) -> (String, Option<String>, Map<String, Value>) {
    let mut map = payload.unwrap_or_default();
    // Points written by other tools may lack a `pk`; fall back to the point id.
    let pk = match map.remove(PK_FIELD) {
        Some(Value::String(pk)) => pk,
        _ => stringify_point_id(id),
    };
    let text = match map.remove(TEXT_FIELD) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    };
    let metadata = match map.remove(METADATA_FIELD) {
        Some(Value::Object(metadata)) => metadata,
        _ => Map::new(),
    };
    (pk, text, metadata)
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_is_stable() {
        let h1 = compute_content_hash("Hello world");
        let h2 = compute_content_hash("Hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_content_hash("Hello world!"));
        assert_eq!(h1, "64ec88ca00b268e5ba1a35678a1b5316d212f4f366b2477232534a8aeca37f3c");
    }

    #[test]
    fn point_id_is_deterministic_uuid() {
        let first = point_id_for_pk("doc-1");
        assert_eq!(first, point_id_for_pk("doc-1"));
        assert_ne!(first, point_id_for_pk("doc-2"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn payload_nests_metadata() {
        let metadata = json!({ "userId": "u-1", "lang": "en" })
            .as_object()
            .cloned()
            .expect("object");
        let payload = build_payload("pk-1", "sample", &metadata, "2025-01-01T00:00:00Z");
        assert_eq!(payload["pk"], "pk-1");
        assert_eq!(payload["text"], "sample");
        assert_eq!(payload["metadata"]["userId"], "u-1");
        assert_eq!(payload["updated_at"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn stored_record_falls_back_to_point_id() {
        let record = stored_record_from_payload(json!(42), None);
        assert_eq!(record.pk, "42");
        assert!(record.text.is_none());
        assert!(record.metadata.is_empty());
    }
}
