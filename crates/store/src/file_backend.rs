//! File-based backend: every slot in one JSON object.
//!
//! Storage location: `~/.companion/store.json` unless configured otherwise.
//!
//! Slots are loaded into memory on creation and the whole object is
//! rewritten on every mutation. The file is written to a sibling temp file
//! first and then renamed over the original.

use async_trait::async_trait;
use companion_core::KeyValueStore;
use companion_core::error::StoreError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed store holding a single JSON object of string slots.
pub struct FileStore {
    path: PathBuf,
    slots: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at the given path.
    ///
    /// A missing file starts empty (created on first write). An unreadable
    /// or corrupted file also starts empty, with a warning; it is
    /// overwritten on the next write.
    pub fn new(path: PathBuf) -> Self {
        let slots = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = slots.len(), "File store loaded");
        Self {
            path,
            slots: RwLock::new(slots),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };

        if content.trim().is_empty() {
            return BTreeMap::new();
        }

        let parsed = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&content);
        let object = match parsed {
            Ok(object) => object,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupted store file, starting empty");
                return BTreeMap::new();
            }
        };

        object
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                other => {
                    warn!(key = %key, kind = %json_kind(&other), "Skipping non-string slot");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self, slots: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create store directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(slots)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace store file: {e}")))?;

        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        // Hold the write lock across the flush so concurrent writers land in order.
        let mut slots = self.slots.write().await;
        let mut updated = slots.clone();
        updated.insert(key.to_string(), value);
        self.flush(&updated).await?;
        *slots = updated;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut slots = self.slots.write().await;
        if !slots.contains_key(key) {
            return Ok(false);
        }
        let mut updated = slots.clone();
        updated.remove(key);
        self.flush(&updated).await?;
        *slots = updated;
        Ok(true)
    }
}
