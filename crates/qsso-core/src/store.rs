//! Persistent key/value state.
//!
//! The auth core keeps very little on disk: the legacy connection list it
//! migrates away from and the first-run onboarding flag. Values are JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state file root must be a JSON object")]
    InvalidFormat,
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Store for tests and ephemeral runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStore {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Store backed by a single JSON object on disk. The file is read lazily on
/// first access and rewritten (temp file + rename) on every mutation.
pub struct JsonFileStateStore {
    path: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(Map::new()),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => Ok(map),
                _ => Err(StoreError::InvalidFormat),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet");
                Ok(Map::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Run `f` against the cached map, loading it first if needed.
    async fn with_map<T>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> T,
    ) -> Result<(T, Map<String, Value>), StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        let map = cache.get_or_insert_with(Map::new);
        let out = f(map);
        Ok((out, map.clone()))
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let (value, _) = self.with_map(|map| map.get(key).cloned()).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut map = match cache.take() {
            Some(map) => map,
            None => self.load().await?,
        };
        map.insert(key.to_string(), value);
        let result = self.persist(&map).await;
        *cache = Some(map);
        result
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let (removed, map) = self.with_map(|map| map.remove(key).is_some()).await?;
        if removed {
            self.persist(&map).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStateStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.get_bool("k").await.unwrap());

        store.set("k", json!(true)).await.unwrap();
        assert!(store.get_bool("k").await.unwrap());

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStateStore::new(&path);
        store.set("auth.profiles", json!({ "a": 1 })).await.unwrap();
        store.set("flag", json!(true)).await.unwrap();

        let reopened = JsonFileStateStore::new(&path);
        assert_eq!(
            reopened.get("auth.profiles").await.unwrap(),
            Some(json!({ "a": 1 }))
        );
        assert!(reopened.get_bool("flag").await.unwrap());

        reopened.remove("auth.profiles").await.unwrap();
        let again = JsonFileStateStore::new(&path);
        assert!(again.get("auth.profiles").await.unwrap().is_none());
        assert!(again.get_bool("flag").await.unwrap());
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"[1, 2]").unwrap();

        let store = JsonFileStateStore::new(&path);
        assert!(matches!(store.get("k").await, Err(StoreError::InvalidFormat)));
    }

    #[tokio::test]
    async fn test_json_file_store_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"\n").unwrap();

        let store = JsonFileStateStore::new(&path);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
