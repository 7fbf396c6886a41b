//! Persisted cache bridge
//!
//! Stores each scope's kernel list in the memento as `{ kernels,
//! extensionVersion }`. A blob written by any other extension version is
//! discarded whole: its paths may point into a removed install directory.

use crate::diagnostics::Diagnostics;
use crate::error::AdvisoryKind;
use crate::fs::FileSystem;
use crate::spec::{KernelSpecRecord, PersistedBlob, PersistedKernel};
use crate::store::Memento;
use serde_json::Value;
use std::sync::Arc;

/// Reads and writes per-scope kernel lists in the memento
#[derive(Clone)]
pub struct PersistedCache {
    store: Arc<dyn Memento>,
    fs: Arc<dyn FileSystem>,
    extension_version: Arc<str>,
    key_prefix: Arc<str>,
    legacy_keys: Arc<[String]>,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for PersistedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCache")
            .field("extension_version", &self.extension_version)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl PersistedCache {
    /// Create bridge over `store`
    #[must_use]
    pub fn new(
        store: Arc<dyn Memento>,
        fs: Arc<dyn FileSystem>,
        extension_version: &str,
        key_prefix: &str,
        legacy_keys: Vec<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            store,
            fs,
            extension_version: Arc::from(extension_version),
            key_prefix: Arc::from(key_prefix),
            legacy_keys: legacy_keys.into(),
            diagnostics,
        }
    }

    /// Memento key for a scope
    #[inline]
    #[must_use]
    pub fn key(&self, scope_key: &str) -> String {
        format!("{}{}", self.key_prefix, scope_key)
    }

    /// Cached kernels for a scope that are still valid
    ///
    /// Empty when nothing is stored, the blob is unreadable, or it was
    /// written under another extension version.
    pub async fn load(&self, scope_key: &str) -> Vec<KernelSpecRecord> {
        let key = self.key(scope_key);
        let value = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to read persisted kernels");
                return Vec::new();
            }
        };
        let blob: PersistedBlob = match serde_json::from_value(value) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "ignoring unreadable persisted kernels");
                return Vec::new();
            }
        };
        if blob.extension_version != *self.extension_version {
            self.diagnostics.report(
                AdvisoryKind::VersionMismatch,
                format!(
                    "discarding {} cached kernels for '{scope_key}' written by version {} (running {})",
                    blob.kernels.len(),
                    blob.extension_version,
                    self.extension_version
                ),
            );
            return Vec::new();
        }

        let mut valid = Vec::with_capacity(blob.kernels.len());
        for entry in blob.kernels {
            let Ok(wire) = serde_json::from_value::<PersistedKernel>(entry) else {
                continue;
            };
            let record = KernelSpecRecord::from(wire);
            if self.is_valid_cached_kernel(&record).await {
                valid.push(record);
            }
        }
        tracing::debug!(scope = scope_key, count = valid.len(), "restored persisted kernels");
        valid
    }

    /// Write a scope's kernels under the running version
    ///
    /// Also starts a background prune of stale slots. Write failures are
    /// recorded as advisory.
    pub async fn save(&self, scope_key: &str, records: &[KernelSpecRecord]) {
        let key = self.key(scope_key);

        let cleanup = self.clone();
        let skip = key.clone();
        tokio::spawn(async move {
            cleanup.cleanup_stale_slots(&skip).await;
        });

        let kernels: Vec<Value> = records
            .iter()
            .filter_map(|r| serde_json::to_value(PersistedKernel::from(r)).ok())
            .collect();
        let blob = PersistedBlob {
            kernels,
            extension_version: self.extension_version.to_string(),
        };
        let value = match serde_json::to_value(&blob) {
            Ok(value) => value,
            Err(e) => {
                self.diagnostics.report(
                    AdvisoryKind::CleanupFailure,
                    format!("failed to serialize kernels for '{scope_key}': {e}"),
                );
                return;
            }
        };
        if let Err(e) = self.store.update(&key, Some(value)).await {
            self.diagnostics.report(
                AdvisoryKind::CleanupFailure,
                format!("failed to persist kernels for '{scope_key}': {e}"),
            );
        }
    }

    /// Remove a scope's persisted kernels
    pub async fn clear(&self, scope_key: &str) {
        if let Err(e) = self.store.update(&self.key(scope_key), None).await {
            self.diagnostics.report(
                AdvisoryKind::CleanupFailure,
                format!("failed to clear persisted kernels for '{scope_key}': {e}"),
            );
        }
    }

    /// Remove every slot under the registry prefix, plus legacy keys
    ///
    /// Returns the number of keys removed.
    pub async fn clear_all(&self) -> usize {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.diagnostics
                    .report(AdvisoryKind::CleanupFailure, format!("failed to list keys: {e}"));
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys
            .iter()
            .filter(|k| k.starts_with(&*self.key_prefix) || self.legacy_keys.contains(k))
        {
            if self.remove_key(key).await {
                removed += 1;
            }
        }
        removed
    }

    /// Prune legacy keys and prefixed slots written by other versions
    ///
    /// `skip` is never touched. Returns the number of keys removed.
    pub async fn cleanup_stale_slots(&self, skip: &str) -> usize {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.diagnostics
                    .report(AdvisoryKind::CleanupFailure, format!("failed to list keys: {e}"));
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.as_str() != skip) {
            let stale = if self.legacy_keys.contains(key) {
                true
            } else if key.starts_with(&*self.key_prefix) {
                self.is_other_version(key).await
            } else {
                false
            };
            if stale && self.remove_key(key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned stale persisted kernel slots");
        }
        removed
    }

    /// Whether a restored record still points at existing files
    ///
    /// Interpreter-only records need their interpreter; spec-file records need
    /// the spec file and, when present, the interpreter.
    pub async fn is_valid_cached_kernel(&self, record: &KernelSpecRecord) -> bool {
        if record.is_interpreter_only() {
            if let Some(interpreter) = record.interpreter_path() {
                return self.fs.exists(interpreter).await;
            }
        }
        if let Some(spec_file) = record.spec_file_path() {
            if !self.fs.exists(spec_file).await {
                tracing::debug!(path = %spec_file.display(), "cached kernel spec file is gone");
                return false;
            }
        }
        if let Some(interpreter) = record.interpreter_path() {
            if !self.fs.exists(interpreter).await {
                tracing::debug!(path = %interpreter.display(), "cached kernel interpreter is gone");
                return false;
            }
        }
        true
    }

    async fn is_other_version(&self, key: &str) -> bool {
        match self.store.get(key).await {
            Ok(Some(value)) => serde_json::from_value::<PersistedBlob>(value)
                .map_or(true, |blob| blob.extension_version != *self.extension_version),
            _ => false,
        }
    }

    async fn remove_key(&self, key: &str) -> bool {
        match self.store.update(key, None).await {
            Ok(()) => true,
            Err(e) => {
                self.diagnostics.report(
                    AdvisoryKind::CleanupFailure,
                    format!("failed to remove persisted slot '{key}': {e}"),
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::store::InMemoryMemento;
    use serde_json::json;

    fn cache(store: Arc<InMemoryMemento>, version: &str, diagnostics: Diagnostics) -> PersistedCache {
        PersistedCache::new(
            store,
            Arc::new(LocalFileSystem::new()),
            version,
            "kernelspecs.",
            vec!["legacy-kernels".to_string()],
            diagnostics,
        )
    }

    fn existing_record(dir: &std::path::Path) -> KernelSpecRecord {
        let spec = dir.join("python3/kernel.json");
        std::fs::create_dir_all(spec.parent().unwrap()).unwrap();
        std::fs::write(&spec, "{}").unwrap();
        KernelSpecRecord::new("python3", "Python 3", "python", vec!["python".into()])
            .with_spec_file(spec)
    }

    #[tokio::test]
    async fn save_then_load_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryMemento::new());
        let cache = cache(store.clone(), "1.0.0", Diagnostics::default());

        let record = existing_record(dir.path());
        cache.save("local", std::slice::from_ref(&record)).await;

        assert_eq!(cache.load("local").await, vec![record]);
        let stored = store.get("kernelspecs.local").await.unwrap().unwrap();
        assert_eq!(stored["extensionVersion"], json!("1.0.0"));
    }

    #[tokio::test]
    async fn version_mismatch_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryMemento::new());
        let old = cache(store.clone(), "1.0.0", Diagnostics::default());
        old.save("local", &[existing_record(dir.path())]).await;

        let diagnostics = Diagnostics::default();
        let new = cache(store, "1.0.1", diagnostics.clone());
        assert!(new.load("local").await.is_empty());
        assert_eq!(diagnostics.count(AdvisoryKind::VersionMismatch), 1);
    }

    #[tokio::test]
    async fn missing_files_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryMemento::new());
        let cache = cache(store, "1.0.0", Diagnostics::default());

        let kept = existing_record(dir.path());
        let gone = KernelSpecRecord::new("ir", "R", "r", vec!["R".into()])
            .with_spec_file(dir.path().join("ir/kernel.json"));
        cache.save("local", &[kept.clone(), gone]).await;

        assert_eq!(cache.load("local").await, vec![kept]);
    }

    #[tokio::test]
    async fn undecodable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryMemento::new());
        let record = existing_record(dir.path());
        let good = serde_json::to_value(PersistedKernel::from(&record)).unwrap();
        store
            .update(
                "kernelspecs.local",
                Some(json!({"kernels": [{"bogus": true}, good], "extensionVersion": "1.0.0"})),
            )
            .await
            .unwrap();

        let cache = cache(store, "1.0.0", Diagnostics::default());
        assert_eq!(cache.load("local").await, vec![record]);
    }

    #[tokio::test]
    async fn interpreter_only_record_needs_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let python = dir.path().join("bin/python");
        std::fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::fs::write(&python, "").unwrap();

        let cache = cache(Arc::new(InMemoryMemento::new()), "1.0.0", Diagnostics::default());
        let record = KernelSpecRecord::new("py", "Py", "python", vec![]).with_interpreter_path(&python);
        assert!(cache.is_valid_cached_kernel(&record).await);

        std::fs::remove_file(&python).unwrap();
        assert!(!cache.is_valid_cached_kernel(&record).await);
    }

    #[tokio::test]
    async fn cleanup_prunes_other_versions_and_legacy_keys() {
        let store = Arc::new(InMemoryMemento::new());
        store
            .update("kernelspecs.remote", Some(json!({"kernels": [], "extensionVersion": "0.9.0"})))
            .await
            .unwrap();
        store
            .update("kernelspecs.workspace", Some(json!({"kernels": [], "extensionVersion": "1.0.0"})))
            .await
            .unwrap();
        store.update("legacy-kernels", Some(json!([]))).await.unwrap();
        store.update("unrelated", Some(json!(1))).await.unwrap();
        store
            .update("kernelspecs.local", Some(json!({"kernels": [], "extensionVersion": "0.1.0"})))
            .await
            .unwrap();

        let cache = cache(store.clone(), "1.0.0", Diagnostics::default());
        let removed = cache.cleanup_stale_slots("kernelspecs.local").await;

        assert_eq!(removed, 2);
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["kernelspecs.local", "kernelspecs.workspace", "unrelated"]);
    }

    #[tokio::test]
    async fn clear_all_keeps_unrelated_keys() {
        let store = Arc::new(InMemoryMemento::new());
        store.update("kernelspecs.local", Some(json!({}))).await.unwrap();
        store.update("legacy-kernels", Some(json!([]))).await.unwrap();
        store.update("unrelated", Some(json!(1))).await.unwrap();

        let cache = cache(store.clone(), "1.0.0", Diagnostics::default());
        assert_eq!(cache.clear_all().await, 2);
        assert_eq!(store.keys().await.unwrap(), vec!["unrelated"]);
    }
}
