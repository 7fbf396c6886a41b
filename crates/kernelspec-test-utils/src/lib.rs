//! Testing utilities for the kernelspec workspace
//!
//! Spec-file fixtures, a counting file system and registry constructors.

#![allow(missing_docs)]

use async_trait::async_trait;
use kernelspec_core::{
    FileSystem, InMemoryMemento, KernelSpecRegistry, LocalFileSystem, RegistryConfig,
    RegistryResult, StaticPresence,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Write `<root>/<dir>/kernel.json` and return its path
pub fn write_kernel_spec(root: &Path, dir: &str, spec: &Value) -> PathBuf {
    let path = root.join(dir).join("kernel.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_vec_pretty(spec).unwrap()).unwrap();
    path
}

/// Minimal ipykernel spec
pub fn python_spec(name: &str, display_name: &str) -> Value {
    json!({
        "name": name,
        "display_name": display_name,
        "language": "python",
        "argv": ["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
    })
}

/// Spec as written by an earlier extension version for an interpreter
pub fn extension_spec(name: &str, interpreter: &Path) -> Value {
    json!({
        "name": name,
        "display_name": "Python 3",
        "language": "python",
        "argv": [interpreter.to_string_lossy(), "-m", "ipykernel_launcher", "-f", "{connection_file}"],
        "metadata": { "interpreter": { "path": interpreter.to_string_lossy() } },
    })
}

/// Create an empty file standing in for an interpreter binary
pub fn fake_interpreter(root: &Path, relative: &str) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"").unwrap();
    path
}

/// Local file system that counts globs and can hold them at a gate
#[derive(Debug)]
pub struct CountingFileSystem {
    inner: LocalFileSystem,
    globs: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl CountingFileSystem {
    pub fn new() -> Self {
        Self {
            inner: LocalFileSystem::new(),
            globs: AtomicUsize::new(0),
            gate: watch::Sender::new(true),
        }
    }

    /// Number of `search_glob` calls so far
    pub fn glob_count(&self) -> usize {
        self.globs.load(Ordering::SeqCst)
    }

    /// Block subsequent globs until [`CountingFileSystem::release`]
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }
}

impl Default for CountingFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for CountingFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }

    async fn read_file(&self, path: &Path) -> RegistryResult<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> RegistryResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn copy_dir(&self, src: &Path, dst: &Path) -> RegistryResult<()> {
        self.inner.copy_dir(src, dst).await
    }

    async fn remove(&self, path: &Path) -> RegistryResult<()> {
        self.inner.remove(path).await
    }

    async fn search_glob(
        &self,
        pattern: &str,
        root: &Path,
        recursive: bool,
    ) -> RegistryResult<Vec<PathBuf>> {
        self.globs.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.inner.search_glob(pattern, root, recursive).await
    }
}

/// Registry over the local disk with an in-memory store
pub fn test_registry(version: &str) -> KernelSpecRegistry {
    registry_with(version, Arc::new(LocalFileSystem::new()), Arc::new(InMemoryMemento::new()))
}

/// Registry with explicit file system and store
pub fn registry_with(
    version: &str,
    fs: Arc<dyn FileSystem>,
    store: Arc<InMemoryMemento>,
) -> KernelSpecRegistry {
    KernelSpecRegistry::new(
        RegistryConfig::default().with_extension_version(version),
        fs,
        store,
        Arc::new(StaticPresence::new(false)),
    )
    .unwrap()
}
