use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Opaque, serializable domain structure carried by drafts and queue items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    pub fn new(value: Value) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Invalid JSON payload: {e}"))?;
        Self::new(value)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }

    /// Stable digest of the payload, used to detect unsaved changes.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        STANDARD.encode(digest)
    }

    /// Copy with every array serializing larger than `max_bytes` replaced by an
    /// empty array. Used when a mirror has to fit a small quota.
    pub fn without_large_arrays(&self, max_bytes: usize) -> Payload {
        Payload(strip_large_arrays(&self.0, max_bytes))
    }

    fn validate(value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Err("Payload cannot be null".to_string());
        }
        Ok(())
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.0
    }
}

fn strip_large_arrays(value: &Value, max_bytes: usize) -> Value {
    match value {
        Value::Array(items) => {
            let size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
            if size > max_bytes {
                Value::Array(Vec::new())
            } else {
                Value::Array(
                    items
                        .iter()
                        .map(|item| strip_large_arrays(item, max_bytes))
                        .collect(),
                )
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), strip_large_arrays(v, max_bytes)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_payload_is_rejected() {
        assert!(Payload::new(Value::Null).is_err());
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = Payload::new(json!({"answers": [1, 2]})).unwrap();
        let b = Payload::new(json!({"answers": [1, 3]})).unwrap();
        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn large_nested_arrays_are_stripped() {
        let big: Vec<String> = (0..100).map(|i| format!("answer-{i}")).collect();
        let payload = Payload::new(json!({
            "title": "kitchen",
            "sections": { "answers": big, "flags": [true] }
        }))
        .unwrap();

        let reduced = payload.without_large_arrays(64);
        assert_eq!(reduced.as_json()["title"], "kitchen");
        assert_eq!(reduced.as_json()["sections"]["answers"], json!([]));
        assert_eq!(reduced.as_json()["sections"]["flags"], json!([true]));
        assert!(reduced.byte_len() < payload.byte_len());
    }
}
