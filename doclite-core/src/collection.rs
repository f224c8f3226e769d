// src/collection.rs
// Collection operations: insertion, lookup, update, delete, aggregation and
// index management over one document directory.

use std::path::PathBuf;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregation::Pipeline;
use crate::cache::QueryCache;
use crate::crypto::Codec;
use crate::document::{
    document_file_name, generate_document_id, Document, DOCUMENT_ID_FIELD, FILE_EXT,
    UPDATED_AT_FIELD,
};
use crate::error::{DocLiteError, Result};
use crate::find_options::compare_values;
use crate::index::{CreateIndexReport, IndexManager};
use crate::reader::{document_id_targets, FindBuilder};
use crate::searcher;
use crate::storage;
use crate::workers::{self, WorkerConfig};

/// Options supplied when creating a collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    pub encrypted: bool,
    /// Explicit encryption key; a host-derived default is used when the
    /// collection is encrypted without one.
    pub encryption_key: Option<String>,
}

/// Snapshot of a collection's state.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub path: String,
    #[serde(rename = "documentCount")]
    pub document_count: usize,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    pub indexes: Vec<String>,
}

/// Result of `update_one`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "newData")]
    pub new_data: Value,
    #[serde(rename = "previousData")]
    pub previous_data: Value,
}

/// Result of `update_many`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateManyResult {
    #[serde(rename = "modifiedCount")]
    pub modified_count: usize,
    #[serde(rename = "documentIds")]
    pub document_ids: Vec<String>,
}

/// A directory-backed set of documents sharing indexes and encryption
/// policy. One file per document; mutations hold the in-process write lock
/// and invalidate the whole query cache.
pub struct Collection {
    name: String,
    path: PathBuf,
    codec: Option<Codec>,
    indexes: IndexManager,
    cache: QueryCache,
    workers: WorkerConfig,
    state: RwLock<()>,
}

impl Collection {
    /// Open a collection directory, bootstrapping the index registry (and
    /// the always-present `documentId` index) if missing.
    pub(crate) fn open(name: String, path: PathBuf, codec: Option<Codec>) -> Result<Self> {
        let indexes = IndexManager::new(&path);
        indexes.ensure_index_meta()?;

        Ok(Collection {
            name,
            path,
            codec,
            indexes,
            cache: QueryCache::new(),
            workers: WorkerConfig::default(),
            state: RwLock::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========== INSERTION ==========

    /// Insert a document: generate a collision-checked unique id, stamp the
    /// engine fields, encrypt when the collection is encrypted, and write
    /// one file. Returns the new document id.
    pub fn insert(&self, data: &Value) -> Result<String> {
        let _guard = self.state.write();

        if !data.is_object() {
            return Err(DocLiteError::Validation(
                "document data must be an object".into(),
            ));
        }

        let id = loop {
            let candidate = generate_document_id();
            if !storage::file_exists(&self.path.join(document_file_name(&candidate))) {
                break candidate;
            }
        };

        let document = Document::new(id.clone(), data)?;
        let value: Value = document.into();

        self.write_document_value(&id, &value)?;
        self.indexes.index_document(&value, &document_file_name(&id))?;
        self.cache.invalidate_all();

        debug!(collection = %self.name, id = %id, "inserted document");
        Ok(id)
    }

    // ========== QUERIES ==========

    /// Start a find over a base query object.
    pub fn find(&self, query: Value) -> FindBuilder<'_> {
        FindBuilder::new(self, query)
    }

    /// First matching document, or a not-found error for an empty match set.
    pub fn find_one(&self, query: Value) -> Result<Value> {
        let result = self.find(query).find_one(true).exec()?;
        result
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| DocLiteError::DocumentNotFound("no documents found".into()))
    }

    /// Number of documents matching a query.
    pub fn count_documents(&self, query: Value) -> Result<usize> {
        let result = self.find(query).with_limit(0).with_count(true).exec()?;
        Ok(result.total_documents.unwrap_or(0))
    }

    // ========== UPDATE ==========

    /// Update the first match (or the first after `sort`): merge only the
    /// supplied fields into the old document, stamp `updatedAt`, delete the
    /// old file and re-insert under the same id.
    pub fn update_one(
        &self,
        query: &Value,
        changes: &Value,
        sort: Option<(&str, i32)>,
    ) -> Result<UpdateResult> {
        let _guard = self.state.write();

        let mut matches = self.locate_tagged(query)?;
        if matches.is_empty() {
            return Err(DocLiteError::DocumentNotFound(
                "no documents matched the query".into(),
            ));
        }
        sort_tagged(&mut matches, sort);

        // Invalidate before touching files so a partial failure can never
        // leave a stale cached result behind.
        self.cache.invalidate_all();

        let (file_name, previous) = matches.remove(0);
        let result = self.rewrite_document(&file_name, &previous, changes)?;

        debug!(collection = %self.name, id = %result.document_id, "updated document");
        Ok(result)
    }

    /// Update every match; returns the affected count and ids.
    pub fn update_many(&self, query: &Value, changes: &Value) -> Result<UpdateManyResult> {
        let _guard = self.state.write();

        let matches = self.locate_tagged(query)?;
        if matches.is_empty() {
            return Err(DocLiteError::DocumentNotFound(
                "no documents matched the query".into(),
            ));
        }

        self.cache.invalidate_all();

        let mut document_ids = Vec::with_capacity(matches.len());
        for (file_name, previous) in matches {
            let result = self.rewrite_document(&file_name, &previous, changes)?;
            document_ids.push(result.document_id);
        }

        debug!(collection = %self.name, count = document_ids.len(), "updated documents");
        Ok(UpdateManyResult {
            modified_count: document_ids.len(),
            document_ids,
        })
    }

    // ========== DELETE ==========

    /// Delete the first match (or the first after `sort`); returns the
    /// deleted document for audit.
    pub fn delete_one(&self, query: &Value, sort: Option<(&str, i32)>) -> Result<Value> {
        let _guard = self.state.write();

        let mut matches = self.locate_tagged(query)?;
        if matches.is_empty() {
            return Err(DocLiteError::DocumentNotFound(
                "no documents matched the query".into(),
            ));
        }
        sort_tagged(&mut matches, sort);
        self.cache.invalidate_all();

        let (file_name, previous) = matches.remove(0);
        self.remove_document(&file_name, &previous)?;

        debug!(collection = %self.name, file = %file_name, "deleted document");
        Ok(previous)
    }

    /// Delete every match; returns the deleted documents for audit.
    pub fn delete_many(&self, query: &Value) -> Result<Vec<Value>> {
        let _guard = self.state.write();

        let matches = self.locate_tagged(query)?;
        if matches.is_empty() {
            return Err(DocLiteError::DocumentNotFound(
                "no documents matched the query".into(),
            ));
        }

        self.cache.invalidate_all();

        let mut deleted = Vec::with_capacity(matches.len());
        for (file_name, previous) in matches {
            self.remove_document(&file_name, &previous)?;
            deleted.push(previous);
        }

        debug!(collection = %self.name, count = deleted.len(), "deleted documents");
        Ok(deleted)
    }

    // ========== AGGREGATION ==========

    /// Evaluate an aggregation pipeline over the full document set, loaded
    /// through the worker pool like any other bulk read.
    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline)?;

        let _guard = self.state.read();
        let loaded = self.load_all()?;
        let docs = loaded.into_iter().map(|(_, doc)| doc).collect();

        pipeline.execute(docs)
    }

    // ========== INDEX OPERATIONS ==========

    /// Create one index per field, backfilled from the current documents.
    /// Partial success across fields is reported, not rolled back.
    pub fn create_index(&self, fields: &[&str]) -> Result<CreateIndexReport> {
        let _guard = self.state.write();

        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let documents = self.load_all()?;
        self.indexes.create_index(&fields, &documents)
    }

    /// Drop a per-field index.
    pub fn drop_index(&self, field: &str) -> Result<()> {
        let _guard = self.state.write();
        self.indexes.drop_index(field)
    }

    /// Names of the indexed fields.
    pub fn list_indexes(&self) -> Result<Vec<String>> {
        self.indexes.list_index_fields()
    }

    // ========== INFO ==========

    pub fn info(&self) -> Result<CollectionInfo> {
        let _guard = self.state.read();
        Ok(CollectionInfo {
            name: self.name.clone(),
            path: self.path.to_string_lossy().into_owned(),
            document_count: self.list_document_files()?.len(),
            is_encrypted: self.codec.is_some(),
            indexes: self.indexes.list_index_fields()?,
        })
    }

    // ========== INTERNAL: reader support ==========

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.state.read()
    }

    pub(crate) fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn workers(&self) -> &WorkerConfig {
        &self.workers
    }

    /// Read exactly the named documents. Files that do not exist simply
    /// produce no document.
    pub(crate) fn load_by_ids(&self, ids: &[String]) -> Result<Vec<(String, Value)>> {
        let paths: Vec<PathBuf> = ids
            .iter()
            .map(|id| self.path.join(document_file_name(id)))
            .collect();
        workers::load_documents(&paths, self.codec.as_ref(), &self.workers)
    }

    /// Candidate selection for a query: an index-provided file list when one
    /// matches, otherwise the full directory listing.
    pub(crate) fn load_candidates(&self, query: &Value) -> Result<Vec<(String, Value)>> {
        let indexed = self.indexes.files_from_index(query)?;
        let paths: Vec<PathBuf> = if indexed.is_empty() {
            self.list_document_files()?
        } else {
            debug!(collection = %self.name, files = indexed.len(), "index-assisted selection");
            indexed.iter().map(|f| self.path.join(f)).collect()
        };
        workers::load_documents(&paths, self.codec.as_ref(), &self.workers)
    }

    // ========== INTERNAL: helpers ==========

    fn load_all(&self) -> Result<Vec<(String, Value)>> {
        let paths = self.list_document_files()?;
        workers::load_documents(&paths, self.codec.as_ref(), &self.workers)
    }

    /// Document files in the collection directory, honoring the lock
    /// protocol around the listing.
    fn list_document_files(&self) -> Result<Vec<PathBuf>> {
        Ok(storage::list_dir_locked(&self.path)?
            .into_iter()
            .filter(|p| {
                p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(FILE_EXT)
            })
            .collect())
    }

    /// Locate update/delete targets as `(file_name, document)` pairs, using
    /// the same selection protocol as the query engine but against a fresh
    /// directory listing.
    fn locate_tagged(&self, query: &Value) -> Result<Vec<(String, Value)>> {
        let conditions = query
            .as_object()
            .ok_or_else(|| DocLiteError::InvalidQuery("query must be an object".into()))?;

        let loaded = match document_id_targets(conditions) {
            Some(ids) => self.load_by_ids(&ids)?,
            None => self.load_candidates(query)?,
        };

        searcher::find_tagged(loaded, query, &self.workers)
    }

    /// Merge-and-rewrite one document: new fields over old, fresh
    /// `updatedAt`, delete then re-insert under the same id. A failed
    /// re-insert after the delete is surfaced as an error without rollback.
    fn rewrite_document(
        &self,
        file_name: &str,
        previous: &Value,
        changes: &Value,
    ) -> Result<UpdateResult> {
        let id = document_id_of(previous, file_name)?;
        let merged = merged_data(previous, changes)?;
        let document = Document::new(id.clone(), &merged)?;
        let new_value: Value = document.into();

        self.indexes.unindex_document(previous, file_name)?;
        storage::delete_file(&self.path.join(file_name))?;

        self.write_document_value(&id, &new_value)?;
        self.indexes.index_document(&new_value, file_name)?;

        Ok(UpdateResult {
            document_id: id,
            new_data: new_value,
            previous_data: previous.clone(),
        })
    }

    fn remove_document(&self, file_name: &str, previous: &Value) -> Result<()> {
        self.indexes.unindex_document(previous, file_name)?;
        storage::delete_file(&self.path.join(file_name))
    }

    fn write_document_value(&self, id: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let body = match &self.codec {
            Some(codec) => codec.encrypt(&text)?,
            None => text,
        };
        storage::write_file(&self.path.join(document_file_name(id)), &body)
    }
}

fn sort_tagged(matches: &mut [(String, Value)], sort: Option<(&str, i32)>) {
    if let Some((field, direction)) = sort {
        matches.sort_by(|a, b| {
            let cmp = compare_values(a.1.get(field), b.1.get(field));
            if direction < 0 {
                cmp.reverse()
            } else {
                cmp
            }
        });
    }
}

/// Recover a match's document id, preferring the engine field and falling
/// back to the file name stem.
fn document_id_of(doc: &Value, file_name: &str) -> Result<String> {
    if let Some(id) = doc.get(DOCUMENT_ID_FIELD).and_then(Value::as_str) {
        return Ok(id.to_string());
    }
    crate::document::document_id_from_file_name(file_name)
        .map(str::to_string)
        .ok_or_else(|| {
            DocLiteError::Validation(format!("document '{}' has no usable id", file_name))
        })
}

/// Shallow-merge the supplied fields over the previous document. Engine
/// fields in the changes are ignored: the id is immutable and the timestamp
/// is stamped by the engine.
fn merged_data(previous: &Value, changes: &Value) -> Result<Value> {
    let changes_obj = changes
        .as_object()
        .ok_or_else(|| DocLiteError::Validation("update data must be an object".into()))?;

    let mut merged = previous.as_object().cloned().unwrap_or_default();
    for (key, value) in changes_obj {
        if key == DOCUMENT_ID_FIELD || key == UPDATED_AT_FIELD {
            warn!(field = %key, "ignoring engine-owned field in update data");
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merged_data_overrides_and_keeps() {
        let previous = json!({"documentId": "x", "updatedAt": 1, "name": "A", "age": 30});
        let merged = merged_data(&previous, &json!({"age": 31})).unwrap();

        assert_eq!(merged["name"], "A");
        assert_eq!(merged["age"], 31);
    }

    #[test]
    fn test_merged_data_ignores_engine_fields() {
        let previous = json!({"documentId": "x", "updatedAt": 1, "age": 30});
        let merged = merged_data(&previous, &json!({"documentId": "y", "age": 31})).unwrap();

        assert_eq!(merged["documentId"], "x");
        assert_eq!(merged["age"], 31);
    }

    #[test]
    fn test_merged_data_rejects_non_object() {
        let previous = json!({"a": 1});
        assert!(merged_data(&previous, &json!(42)).is_err());
    }

    #[test]
    fn test_document_id_of_prefers_field() {
        let doc = json!({"documentId": "fromfield"});
        assert_eq!(document_id_of(&doc, "fromfile.json").unwrap(), "fromfield");

        let bare = json!({"name": "x"});
        assert_eq!(document_id_of(&bare, "fromfile.json").unwrap(), "fromfile");
    }

    #[test]
    fn test_sort_tagged_orders_by_field() {
        let mut matches = vec![
            ("b.json".to_string(), json!({"age": 30})),
            ("a.json".to_string(), json!({"age": 20})),
        ];
        sort_tagged(&mut matches, Some(("age", 1)));
        assert_eq!(matches[0].0, "a.json");

        sort_tagged(&mut matches, Some(("age", -1)));
        assert_eq!(matches[0].0, "b.json");
    }
}
