// src/document.rs
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DocLiteError, Result};

/// Length of the random alphanumeric document id token.
pub const DOCUMENT_ID_LEN: usize = 16;

/// Engine-owned field holding the unique id of a document.
pub const DOCUMENT_ID_FIELD: &str = "documentId";

/// Engine-owned field stamped on create and on every update.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// File extension shared by document and index files.
pub const FILE_EXT: &str = "json";

/// A stored document: user fields plus the two engine-owned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "documentId")]
    pub id: String,

    #[serde(rename = "updatedAt")]
    pub updated_at: i64,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Build a document from user data, stamping `updatedAt` with the
    /// current time. Engine-owned fields in the input are discarded; the
    /// id is immutable and the timestamp is never caller-supplied.
    pub fn new(id: String, data: &Value) -> Result<Self> {
        let obj = data
            .as_object()
            .ok_or_else(|| DocLiteError::Validation("document data must be an object".into()))?;

        let mut fields = Map::new();
        for (key, value) in obj {
            if key == DOCUMENT_ID_FIELD || key == UPDATED_AT_FIELD {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }

        Ok(Document {
            id,
            updated_at: Utc::now().timestamp_millis(),
            fields,
        })
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        let mut map = Map::new();
        map.insert(DOCUMENT_ID_FIELD.to_string(), Value::String(doc.id));
        map.insert(UPDATED_AT_FIELD.to_string(), Value::from(doc.updated_at));
        for (k, v) in doc.fields {
            map.insert(k, v);
        }
        Value::Object(map)
    }
}

/// Generate a candidate document id: a fixed-length random alphanumeric
/// token. Uniqueness is enforced by the caller probing the collection
/// directory and regenerating on collision.
pub fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LEN)
        .map(char::from)
        .collect()
}

/// File name for a document id: `<id>.json`.
pub fn document_file_name(id: &str) -> String {
    format!("{}.{}", id, FILE_EXT)
}

/// Recover the document id from a file name, if it has the right extension.
pub fn document_id_from_file_name(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(&format!(".{}", FILE_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_document_id();
        assert_eq!(id.len(), DOCUMENT_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = generate_document_id();
        let b = generate_document_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_document_new_stamps_engine_fields() {
        let doc = Document::new("abc123".into(), &json!({"name": "Alice", "age": 30})).unwrap();

        assert_eq!(doc.id, "abc123");
        assert!(doc.updated_at > 0);
        assert_eq!(doc.get("name").unwrap(), &json!("Alice"));
        assert_eq!(doc.get("age").unwrap(), &json!(30));
    }

    #[test]
    fn test_document_new_rejects_non_object() {
        assert!(Document::new("x".into(), &json!([1, 2, 3])).is_err());
        assert!(Document::new("x".into(), &json!("plain string")).is_err());
    }

    #[test]
    fn test_document_new_drops_engine_fields_from_input() {
        let doc = Document::new(
            "real-id".into(),
            &json!({"documentId": "spoofed", "updatedAt": 1, "name": "Bob"}),
        )
        .unwrap();

        assert_eq!(doc.id, "real-id");
        assert!(doc.get(DOCUMENT_ID_FIELD).is_none());
        assert!(doc.get(UPDATED_AT_FIELD).is_none());
    }

    #[test]
    fn test_document_roundtrip() {
        let original = Document::new("roundtrip01".into(), &json!({"tags": ["a", "b"]})).unwrap();
        let json_str = original.to_json().unwrap();
        let restored = Document::from_json(&json_str).unwrap();

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.updated_at, original.updated_at);
        assert_eq!(restored.get("tags"), original.get("tags"));
    }

    #[test]
    fn test_document_to_value_has_engine_fields() {
        let doc = Document::new("idvalue".into(), &json!({"k": 1})).unwrap();
        let value: Value = doc.into();

        assert_eq!(value[DOCUMENT_ID_FIELD], json!("idvalue"));
        assert!(value[UPDATED_AT_FIELD].is_i64());
        assert_eq!(value["k"], json!(1));
    }

    #[test]
    fn test_file_name_roundtrip() {
        let name = document_file_name("abc");
        assert_eq!(name, "abc.json");
        assert_eq!(document_id_from_file_name(&name), Some("abc"));
        assert_eq!(document_id_from_file_name("abc.txt"), None);
    }
}
