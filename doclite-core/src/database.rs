// src/database.rs
// A database directory: collections plus the collection-metadata registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{Collection, CollectionInfo, CollectionOptions};
use crate::crypto::Codec;
use crate::error::{DocLiteError, Result};
use crate::storage;

/// Registry file at the database level recording each collection's
/// encryption flag and key.
pub const COLLECTION_META_FILE: &str = "collection.meta";

/// One registry entry in `collection.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub path: String,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "encryptionKey")]
    pub encryption_key: Option<String>,
}

/// Snapshot of a database's state.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: String,
    pub collections: Vec<String>,
}

/// A directory of collections. Collection handles are cached so in-process
/// locks and query caches are shared across lookups.
pub struct Database {
    name: String,
    path: PathBuf,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Create the database directory and an empty collection registry.
    pub(crate) fn create(name: String, path: PathBuf) -> Result<Self> {
        storage::create_dir(&path)?;
        storage::write_file(&path.join(COLLECTION_META_FILE), "[]")?;
        debug!(database = %name, "created database");
        Ok(Database {
            name,
            path,
            collections: RwLock::new(HashMap::new()),
        })
    }

    /// Open an existing database directory. The filesystem is authoritative:
    /// a missing directory is a not-found error, a missing registry reads
    /// as empty and is recreated.
    pub(crate) fn open(name: String, path: PathBuf) -> Result<Self> {
        if !storage::dir_exists(&path) {
            return Err(DocLiteError::DatabaseNotFound(name));
        }
        if !storage::file_exists(&path.join(COLLECTION_META_FILE)) {
            storage::write_file(&path.join(COLLECTION_META_FILE), "[]")?;
        }
        Ok(Database {
            name,
            path,
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a collection, bootstrapping its directory, index registry and
    /// `documentId` index. Duplicate names are a conflict error.
    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<Collection>> {
        validate_name("collection", name)?;

        let dir = self.path.join(name);
        let mut registry = self.registry()?;
        if registry.iter().any(|m| m.name == name) || storage::dir_exists(&dir) {
            return Err(DocLiteError::CollectionExists(name.to_string()));
        }

        storage::create_dir(&dir)?;

        let codec = options
            .encrypted
            .then(|| Codec::new(options.encryption_key.as_deref()));
        let collection = Arc::new(Collection::open(name.to_string(), dir.clone(), codec)?);

        registry.push(CollectionMeta {
            name: name.to_string(),
            path: dir.to_string_lossy().into_owned(),
            is_encrypted: options.encrypted,
            encryption_key: options.encryption_key,
        });
        self.save_registry(&registry)?;

        self.collections
            .write()
            .insert(name.to_string(), collection.clone());
        debug!(database = %self.name, collection = %name, "created collection");
        Ok(collection)
    }

    /// Handle to an existing collection.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(collection) = self.collections.read().get(name) {
            return Ok(collection.clone());
        }

        let meta = self
            .registry()?
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| DocLiteError::CollectionNotFound(name.to_string()))?;

        let codec = meta
            .is_encrypted
            .then(|| Codec::new(meta.encryption_key.as_deref()));
        let collection = Arc::new(Collection::open(
            name.to_string(),
            self.path.join(name),
            codec,
        )?);

        self.collections
            .write()
            .insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        if storage::dir_exists(&self.path.join(name)) {
            return true;
        }
        self.registry()
            .map(|r| r.iter().any(|m| m.name == name))
            .unwrap_or(false)
    }

    /// Delete a collection directory and prune its registry entry.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let dir = self.path.join(name);
        let mut registry = self.registry()?;
        let registered = registry.iter().any(|m| m.name == name);

        if !registered && !storage::dir_exists(&dir) {
            return Err(DocLiteError::CollectionNotFound(name.to_string()));
        }

        if storage::dir_exists(&dir) {
            if storage::is_dir_locked(&dir)? {
                storage::unlock_dir(&dir)?;
            }
            storage::delete_dir(&dir)?;
        }

        registry.retain(|m| m.name != name);
        self.save_registry(&registry)?;
        self.collections.write().remove(name);
        debug!(database = %self.name, collection = %name, "deleted collection");
        Ok(())
    }

    pub fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        self.collection(name)?.info()
    }

    /// Collection names, in registry order.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.into_iter().map(|m| m.name).collect())
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            name: self.name.clone(),
            path: self.path.to_string_lossy().into_owned(),
            collections: self.list_collections()?,
        })
    }

    fn registry(&self) -> Result<Vec<CollectionMeta>> {
        let meta_path = self.path.join(COLLECTION_META_FILE);
        if !storage::file_exists(&meta_path) {
            return Ok(Vec::new());
        }
        let raw = storage::read_file(&meta_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_registry(&self, registry: &[CollectionMeta]) -> Result<()> {
        storage::write_file(
            &self.path.join(COLLECTION_META_FILE),
            &serde_json::to_string(registry)?,
        )
    }
}

/// Reject names that cannot double as directory names.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(DocLiteError::Validation(format!(
            "invalid {} name: '{}'",
            kind, name
        )));
    }
    Ok(())
}
