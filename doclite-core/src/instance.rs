// src/instance.rs
// The root of the directory tree. At most one live instance per process;
// opening a second is a programming error surfaced as a conflict result,
// not a panic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::database::{validate_name, Database, DatabaseInfo};
use crate::error::{DocLiteError, Result};
use crate::storage;

static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

/// Snapshot of the instance: root path plus per-database info, read from
/// the filesystem (the in-process handle map is not authoritative).
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub root: String,
    pub databases: Vec<DatabaseInfo>,
}

/// Root handle over a directory tree of databases. Dependents receive the
/// handle (or a database/collection handle derived from it) explicitly;
/// there is no module-level instance.
pub struct Instance {
    root: PathBuf,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl Instance {
    /// Open the instance rooted at `root`, creating the directory if
    /// missing. Fails with a conflict error while another instance is live
    /// in this process.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DocLiteError::InstanceOpen)?;

        match Self::init(root.as_ref().to_path_buf()) {
            Ok(instance) => Ok(instance),
            Err(e) => {
                INSTANCE_LIVE.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn init(root: PathBuf) -> Result<Self> {
        if !storage::dir_exists(&root) {
            storage::create_dir(&root)?;
        }
        debug!(root = %root.display(), "opened instance");
        Ok(Instance {
            root,
            databases: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a database directory with an empty collection registry.
    pub fn create_database(&self, name: &str) -> Result<Arc<Database>> {
        validate_name("database", name)?;

        let path = self.root.join(name);
        if storage::dir_exists(&path) {
            return Err(DocLiteError::DatabaseExists(name.to_string()));
        }

        let database = Arc::new(Database::create(name.to_string(), path)?);
        self.databases
            .write()
            .insert(name.to_string(), database.clone());
        Ok(database)
    }

    /// Handle to an existing database. The filesystem decides existence;
    /// the handle map only keeps already-opened databases shared.
    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        if let Some(database) = self.databases.read().get(name) {
            return Ok(database.clone());
        }

        let database = Arc::new(Database::open(name.to_string(), self.root.join(name))?);
        self.databases
            .write()
            .insert(name.to_string(), database.clone());
        Ok(database)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        storage::dir_exists(&self.root.join(name))
    }

    /// Delete a database directory recursively, unlocking any locked
    /// collection directories first so the removal can proceed.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        if !storage::dir_exists(&path) {
            return Err(DocLiteError::DatabaseNotFound(name.to_string()));
        }

        for entry in storage::list_dir(&path)? {
            if entry.is_dir() && storage::is_dir_locked(&entry)? {
                storage::unlock_dir(&entry)?;
            }
        }

        storage::delete_dir(&path)?;
        self.databases.write().remove(name);
        debug!(database = %name, "deleted database");
        Ok(())
    }

    /// Enumerate databases and their collections from the filesystem.
    pub fn instance_info(&self) -> Result<InstanceInfo> {
        let mut databases = Vec::new();

        for entry in storage::list_dir(&self.root)? {
            if !entry.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let database = Database::open(name.to_string(), entry.clone())?;
            databases.push(database.info()?);
        }

        Ok(InstanceInfo {
            root: self.root.to_string_lossy().into_owned(),
            databases,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        INSTANCE_LIVE.store(false, Ordering::SeqCst);
    }
}
