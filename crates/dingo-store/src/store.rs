//! In-memory collections with write-through file persistence.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{StoreConfig, StoreError};

/// A collection: key → document.
pub type Collection = Map<String, Value>;

pub const USERS: &str = "users";
pub const CAMPAIGNS: &str = "campaigns";
pub const CONTENT: &str = "content";
pub const ANALYTICS: &str = "analytics";
/// Internal bookkeeping, including the health probe.
pub const SYSTEM: &str = "system";

/// Collections that always exist after [`DocumentStore::open`].
pub const WELL_KNOWN_COLLECTIONS: [&str; 4] = [USERS, CAMPAIGNS, CONTENT, ANALYTICS];

const HEALTH_KEY: &str = "_health_check";

/// Durable key/value document store.
///
/// A file-backed store holds an exclusive lock on `<file>.lock` from open
/// until close, so a second store on the same file fails to open.
///
/// Every mutation holds the store lock while it updates memory and rewrites
/// the backing file, so writers are serialized and the file always holds a
/// complete snapshot.
#[derive(Debug)]
pub struct DocumentStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
    load_warning: Option<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: BTreeMap<String, Collection>,
    /// Memory holds changes the file does not.
    dirty: bool,
    closed: bool,
    /// Exclusive lock on `<file>.lock`, held until close or drop.
    lock: Option<std::fs::File>,
}

impl StoreState {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl DocumentStore {
    /// Open the store described by `config`.
    ///
    /// Creates the backing file's directory and loads existing content. A
    /// file that cannot be read or parsed is logged and replaced by an empty
    /// store unless `strict_load` is set.
    ///
    /// # Errors
    ///
    /// `StoreError::CreateDir` if the directory cannot be created,
    /// `StoreError::Locked` if another open store holds the file, or the load
    /// error when `strict_load` is set.
    #[tracing::instrument(skip(config), fields(database_url = %config.database_url))]
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config.backing_path();
        let mut collections = BTreeMap::new();
        let mut load_warning = None;
        let mut lock = None;

        match &path {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|source| StoreError::CreateDir {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }

                lock = Some(acquire_lock(path).await?);

                match load(path).await {
                    Ok(Some(loaded)) => {
                        info!(path = %path.display(), collections = loaded.len(), "loaded document store");
                        collections = loaded;
                    }
                    Ok(None) => info!(path = %path.display(), "creating new document store"),
                    Err(e) if config.strict_load => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "failed to load document store, starting empty");
                        load_warning = Some(e.to_string());
                    }
                }
            }
            None => info!("using in-memory document store"),
        }

        for name in WELL_KNOWN_COLLECTIONS {
            collections.entry(name.to_string()).or_default();
        }

        Ok(Self {
            path,
            state: Mutex::new(StoreState {
                collections,
                dirty: false,
                closed: false,
                lock,
            }),
            load_warning,
        })
    }

    /// The backing file, or `None` when in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Why the existing file was discarded at open, if it was.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    /// Get one document.
    pub async fn get(&self, collection: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Get a whole collection. Absent collections are empty.
    pub async fn get_collection(&self, collection: &str) -> Collection {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Get one document when `key` is given, otherwise the whole collection
    /// as an object. Absent documents are `null`.
    pub async fn get_data(&self, collection: &str, key: Option<&str>) -> Value {
        match key {
            Some(key) => self.get(collection, key).await.unwrap_or(Value::Null),
            None => Value::Object(self.get_collection(collection).await),
        }
    }

    /// Get one document deserialized as `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(collection, key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Names of every collection, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        self.state.lock().await.collections.keys().cloned().collect()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .map_or(0, Map::len)
    }

    /// Store `value` at `key`, replacing any existing document, then persist.
    ///
    /// The collection is created if absent. On a persistence failure the
    /// change stays in memory and the error is returned.
    #[tracing::instrument(skip(self, value))]
    pub async fn set(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&mut state).await
    }

    /// Serialize `value` and store it at `key`.
    pub async fn set_as<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.set(collection, key, value).await
    }

    /// Remove one document, then persist.
    ///
    /// Returns whether the key existed. An absent collection is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(false);
        };
        let removed = docs.remove(key).is_some();
        self.persist(&mut state).await?;
        Ok(removed)
    }

    /// Remove every document in a collection, then persist.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, collection: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(());
        };
        docs.clear();
        self.persist(&mut state).await
    }

    /// Remove one document when `key` is given, otherwise clear the collection.
    pub async fn delete_data(&self, collection: &str, key: Option<&str>) -> Result<(), StoreError> {
        match key {
            Some(key) => self.delete(collection, key).await.map(|_| ()),
            None => self.clear(collection).await,
        }
    }

    pub async fn get_user(&self, user_id: &str) -> Option<Value> {
        self.get(USERS, user_id).await
    }

    pub async fn save_user(&self, user_id: &str, data: Value) -> Result<(), StoreError> {
        self.set(USERS, user_id, data).await
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Option<Value> {
        self.get(CAMPAIGNS, campaign_id).await
    }

    pub async fn save_campaign(&self, campaign_id: &str, data: Value) -> Result<(), StoreError> {
        self.set(CAMPAIGNS, campaign_id, data).await
    }

    /// Round-trip a probe document through the store.
    ///
    /// Writes, reads back and deletes `system/_health_check`. Returns false
    /// instead of an error on any failure, and never leaves the probe behind.
    pub async fn check_health(&self) -> bool {
        let probe = json!({
            "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        });

        let mut state = self.state.lock().await;
        if state.closed {
            warn!("health check on closed document store");
            return false;
        }

        state
            .collections
            .entry(SYSTEM.to_string())
            .or_default()
            .insert(HEALTH_KEY.to_string(), probe.clone());
        let written = self.persist(&mut state).await;

        let read_back = state
            .collections
            .get(SYSTEM)
            .and_then(|docs| docs.get(HEALTH_KEY))
            .cloned();

        if let Some(docs) = state.collections.get_mut(SYSTEM) {
            docs.remove(HEALTH_KEY);
        }
        let cleaned = self.persist(&mut state).await;

        match written.and(cleaned) {
            Ok(()) => read_back.as_ref() == Some(&probe),
            Err(e) => {
                error!(error = %e, "document store health check failed");
                false
            }
        }
    }

    /// Whether memory holds changes that have not reached the file.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Whether [`DocumentStore::close`] has completed.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Write the current state to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        self.persist(&mut state).await
    }

    /// Flush and mark the store closed.
    ///
    /// Later mutations fail with `StoreError::Closed`; reads keep working.
    /// If the flush fails the store stays open so the caller can retry.
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        self.persist(&mut state).await?;
        state.closed = true;
        state.lock = None;
        info!("document store closed");
        Ok(())
    }

    /// Rewrite the whole backing file from `state`.
    async fn persist(&self, state: &mut StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&state.collections)?;
        match write_atomic(path, content.as_bytes()).await {
            Ok(()) => {
                state.dirty = false;
                debug!(path = %path.display(), bytes = content.len(), "document store saved");
                Ok(())
            }
            Err(source) => {
                state.dirty = true;
                error!(path = %path.display(), error = %source, "failed to save document store");
                Err(StoreError::Persist {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

/// Read the backing file. `Ok(None)` when it does not exist.
async fn load(path: &Path) -> Result<Option<BTreeMap<String, Collection>>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Take the exclusive lock on `<file>.lock`.
async fn acquire_lock(path: &Path) -> Result<std::fs::File, StoreError> {
    let lock_path = sibling(path, ".lock");
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .await
        .map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?
        .into_std()
        .await;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StoreError::Locked {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(StoreError::Lock {
            path: lock_path,
            source,
        }),
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write to a sibling temp file, sync, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = sibling(path, ".tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}
