// src/index.rs
// Per-field file-backed indexes: each index maps a field value to the list
// of document files carrying that value, and a registry file records which
// indexes exist for the collection.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::document::{DOCUMENT_ID_FIELD, FILE_EXT};
use crate::error::{DocLiteError, Result};
use crate::storage;

/// Directory under the collection holding the index files.
pub const INDEX_DIR: &str = "indexes";

/// Registry of created indexes.
pub const INDEX_META_FILE: &str = "index.meta.json";

/// One registry entry: which field is indexed and where its file lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMeta {
    #[serde(rename = "indexFieldName")]
    pub field: String,

    #[serde(rename = "fileName")]
    pub file_name: String,

    pub path: String,
}

/// On-disk index shape: field name plus value -> document file names.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldIndex {
    #[serde(rename = "fieldName")]
    pub field: String,

    #[serde(rename = "indexEntries")]
    pub entries: BTreeMap<String, Vec<String>>,
}

/// Outcome of `create_index` over multiple fields. The operation is not
/// atomic across fields; partial success is reported, not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CreateIndexReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Manages the index files and registry of one collection.
pub struct IndexManager {
    dir: PathBuf,
    meta_path: PathBuf,
}

impl IndexManager {
    pub fn new(collection_path: &std::path::Path) -> Self {
        let dir = collection_path.join(INDEX_DIR);
        let meta_path = dir.join(INDEX_META_FILE);
        IndexManager { dir, meta_path }
    }

    /// Idempotently ensure the index directory and registry exist, creating
    /// the always-present `documentId` index for a new collection.
    pub fn ensure_index_meta(&self) -> Result<()> {
        if !storage::dir_exists(&self.dir) {
            storage::create_dir(&self.dir)?;
        }

        let mut registry = self.registry()?;
        if !registry.iter().any(|m| m.field == DOCUMENT_ID_FIELD) {
            let meta = self.meta_for(DOCUMENT_ID_FIELD);
            self.save_index(&FieldIndex {
                field: DOCUMENT_ID_FIELD.to_string(),
                entries: BTreeMap::new(),
            })?;
            registry.push(meta);
            self.save_registry(&registry)?;
            debug!(dir = %self.dir.display(), "created documentId index");
        }

        Ok(())
    }

    /// Read the index registry. A missing registry reads as empty.
    pub fn registry(&self) -> Result<Vec<IndexMeta>> {
        if !storage::file_exists(&self.meta_path) {
            return Ok(Vec::new());
        }
        let raw = storage::read_file(&self.meta_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Create one index per field. Existing fields are no-ops; a field whose
    /// index file or registry entry cannot be written lands in `failed`.
    /// `documents` is the current collection content used to backfill the
    /// new index so it starts consistent instead of empty-and-stale.
    pub fn create_index(
        &self,
        fields: &[String],
        documents: &[(String, Value)],
    ) -> Result<CreateIndexReport> {
        self.ensure_index_meta()?;

        let mut registry = self.registry()?;
        let mut report = CreateIndexReport::default();

        for field in fields {
            if registry.iter().any(|m| &m.field == field) {
                report.skipped.push(field.clone());
                continue;
            }

            let mut index = FieldIndex {
                field: field.clone(),
                entries: BTreeMap::new(),
            };
            for (file_name, doc) in documents {
                if let Some(value) = doc.get(field) {
                    index
                        .entries
                        .entry(entry_key(value))
                        .or_default()
                        .push(file_name.clone());
                }
            }

            let outcome = self.save_index(&index).and_then(|_| {
                registry.push(self.meta_for(field));
                self.save_registry(&registry)
            });

            match outcome {
                Ok(()) => report.created.push(field.clone()),
                Err(e) => {
                    warn!(field = %field, error = %e, "index creation failed");
                    report.failed.push(field.clone());
                }
            }
        }

        Ok(report)
    }

    /// Drop an index: delete its file and prune the registry entry. A failed
    /// registry rewrite is logged but does not fail the drop.
    pub fn drop_index(&self, field: &str) -> Result<()> {
        if field == DOCUMENT_ID_FIELD {
            return Err(DocLiteError::IndexError(
                "the documentId index cannot be dropped".into(),
            ));
        }

        let mut registry = self.registry()?;
        let before = registry.len();
        registry.retain(|m| m.field != field);
        if registry.len() == before {
            return Err(DocLiteError::IndexError(format!(
                "no index exists for field '{}'",
                field
            )));
        }

        let path = self.index_path(field);
        if storage::file_exists(&path) {
            storage::delete_file(&path)?;
        }

        if let Err(e) = self.save_registry(&registry) {
            warn!(field = %field, error = %e, "registry rewrite failed after index drop");
        }
        debug!(field = %field, "dropped index");
        Ok(())
    }

    /// Registry entries whose field is a property of the document. Drives
    /// index population and the index-assisted candidate selection.
    pub fn find_matching_index_meta(&self, doc: &Value) -> Result<Vec<IndexMeta>> {
        let registry = self.registry()?;
        let Some(obj) = doc.as_object() else {
            return Ok(Vec::new());
        };
        Ok(registry
            .into_iter()
            .filter(|m| obj.contains_key(&m.field))
            .collect())
    }

    /// Candidate document files for a query: the first indexed field that
    /// appears in the query with a scalar value is looked up in its index
    /// file. Returns an empty list when no index matches — callers fall back
    /// to a full directory scan.
    pub fn files_from_index(&self, query: &Value) -> Result<Vec<String>> {
        let Some(conditions) = query.as_object() else {
            return Ok(Vec::new());
        };

        for meta in self.registry()? {
            let Some(value) = conditions.get(&meta.field) else {
                continue;
            };
            if value.is_object() || value.is_array() {
                // Operator objects cannot be served from an equality index.
                continue;
            }

            let index = self.load_index(&meta.field)?;
            return Ok(index
                .entries
                .get(&entry_key(value))
                .cloned()
                .unwrap_or_default());
        }

        Ok(Vec::new())
    }

    /// Add a document's file to every index whose field it carries.
    pub fn index_document(&self, doc: &Value, file_name: &str) -> Result<()> {
        for meta in self.find_matching_index_meta(doc)? {
            let Some(value) = doc.get(&meta.field) else {
                continue;
            };
            let mut index = self.load_index(&meta.field)?;
            let files = index.entries.entry(entry_key(value)).or_default();
            if !files.iter().any(|f| f == file_name) {
                files.push(file_name.to_string());
            }
            self.save_index(&index)?;
        }
        Ok(())
    }

    /// Remove a document's file from every index whose field it carries.
    pub fn unindex_document(&self, doc: &Value, file_name: &str) -> Result<()> {
        for meta in self.find_matching_index_meta(doc)? {
            let Some(value) = doc.get(&meta.field) else {
                continue;
            };
            let mut index = self.load_index(&meta.field)?;
            let key = entry_key(value);
            if let Some(files) = index.entries.get_mut(&key) {
                files.retain(|f| f != file_name);
                if files.is_empty() {
                    index.entries.remove(&key);
                }
                self.save_index(&index)?;
            }
        }
        Ok(())
    }

    /// Names of the indexed fields, in registry order.
    pub fn list_index_fields(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.into_iter().map(|m| m.field).collect())
    }

    fn load_index(&self, field: &str) -> Result<FieldIndex> {
        let path = self.index_path(field);
        if !storage::file_exists(&path) {
            return Ok(FieldIndex {
                field: field.to_string(),
                entries: BTreeMap::new(),
            });
        }
        let raw = storage::read_file(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_index(&self, index: &FieldIndex) -> Result<()> {
        let path = self.index_path(&index.field);
        storage::write_file(&path, &serde_json::to_string(index)?)
    }

    fn save_registry(&self, registry: &[IndexMeta]) -> Result<()> {
        storage::write_file(&self.meta_path, &serde_json::to_string(registry)?)
    }

    fn index_path(&self, field: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", field, FILE_EXT))
    }

    fn meta_for(&self, field: &str) -> IndexMeta {
        let file_name = format!("{}.{}", field, FILE_EXT);
        IndexMeta {
            field: field.to_string(),
            file_name: file_name.clone(),
            path: self.dir.join(file_name).to_string_lossy().into_owned(),
        }
    }
}

/// Render an indexed field value as an entry key. Strings key as themselves,
/// everything else by its JSON rendering.
fn entry_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
