//! Persisted key-value store (memento)
//!
//! Values are JSON documents. Writing `None` deletes the key.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Versioned key-value store surviving process restarts
#[async_trait]
pub trait Memento: Send + Sync + 'static {
    /// Read value for key
    async fn get(&self, key: &str) -> RegistryResult<Option<Value>>;

    /// Write value for key; `None` removes it
    async fn update(&self, key: &str, value: Option<Value>) -> RegistryResult<()>;

    /// All stored keys
    async fn keys(&self) -> RegistryResult<Vec<String>>;
}

/// Process-local memento
#[derive(Debug, Default)]
pub struct InMemoryMemento {
    entries: DashMap<String, Value>,
}

impl InMemoryMemento {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Memento for InMemoryMemento {
    async fn get(&self, key: &str) -> RegistryResult<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn update(&self, key: &str, value: Option<Value>) -> RegistryResult<()> {
        match value {
            Some(value) => {
                self.entries.insert(key.to_string(), value);
            }
            None => {
                self.entries.remove(key);
            }
        }
        Ok(())
    }

    async fn keys(&self) -> RegistryResult<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Memento stored as a single JSON object on disk
///
/// Every update rewrites the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct JsonFileMemento {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileMemento {
    /// Create store backed by `path`; the file is created on first write
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> RegistryResult<BTreeMap<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::json(self.path.display().to_string(), e))
    }

    async fn write_all(&self, entries: &BTreeMap<String, Value>) -> RegistryResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| RegistryError::json(self.path.display().to_string(), e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RegistryError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RegistryError::io(&self.path, e))
    }
}

#[async_trait]
impl Memento for JsonFileMemento {
    async fn get(&self, key: &str) -> RegistryResult<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn update(&self, key: &str, value: Option<Value>) -> RegistryResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        let changed = match value {
            Some(value) => entries.insert(key.to_string(), value.clone()).as_ref() != Some(&value),
            None => entries.remove(key).is_some(),
        };
        if changed {
            self.write_all(&entries).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> RegistryResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_roundtrip_and_delete() {
        let store = InMemoryMemento::new();
        store.update("a", Some(json!({"x": 1}))).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.len(), 1);

        store.update("a", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn json_file_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/memento.json");

        let store = JsonFileMemento::new(&path);
        assert_eq!(store.get("missing").await.unwrap(), None);
        store.update("kernelspecs.local", Some(json!([1, 2]))).await.unwrap();
        store.update("other", Some(json!("v"))).await.unwrap();

        let reopened = JsonFileMemento::new(&path);
        assert_eq!(
            reopened.get("kernelspecs.local").await.unwrap(),
            Some(json!([1, 2]))
        );
        let mut keys = reopened.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["kernelspecs.local", "other"]);

        reopened.update("other", None).await.unwrap();
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_file_rejects_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memento.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileMemento::new(&path);
        assert!(matches!(
            store.get("a").await,
            Err(RegistryError::Json { .. })
        ));
    }
}
