//! File system seam
//!
//! The registry only touches disk through [`FileSystem`]. [`LocalFileSystem`]
//! is the production implementation; tests wrap it to count or delay calls.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Depth used for non-recursive searches: `<root>/<kernel dir>/kernel.json`
const SHALLOW_SEARCH_DEPTH: usize = 2;

/// Async file system operations used by the registry
#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    /// Whether a file or directory exists at `path`
    async fn exists(&self, path: &Path) -> bool;

    /// Read whole file
    async fn read_file(&self, path: &Path) -> RegistryResult<Vec<u8>>;

    /// Create directory and missing parents
    async fn create_dir_all(&self, path: &Path) -> RegistryResult<()>;

    /// Copy a directory tree (or single file) from `src` to `dst`
    async fn copy_dir(&self, src: &Path, dst: &Path) -> RegistryResult<()>;

    /// Delete a file or a directory tree
    async fn remove(&self, path: &Path) -> RegistryResult<()>;

    /// Paths under `root` matching `pattern`, relative to `root`
    ///
    /// A missing `root` yields an empty list.
    async fn search_glob(
        &self,
        pattern: &str,
        root: &Path,
        recursive: bool,
    ) -> RegistryResult<Vec<PathBuf>>;
}

/// Local disk implementation backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create local file system
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_file(&self, path: &Path) -> RegistryResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| RegistryError::io(path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> RegistryResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| RegistryError::io(path, e))
    }

    async fn copy_dir(&self, src: &Path, dst: &Path) -> RegistryResult<()> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| RegistryError::Task(e.to_string()))?
    }

    async fn remove(&self, path: &Path) -> RegistryResult<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| RegistryError::io(path, e))?;
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| RegistryError::io(path, e))
    }

    async fn search_glob(
        &self,
        pattern: &str,
        root: &Path,
        recursive: bool,
    ) -> RegistryResult<Vec<PathBuf>> {
        let matcher = compile_glob(pattern)?;
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || walk_matches(&matcher, &root, recursive))
            .await
            .map_err(|e| RegistryError::Task(e.to_string()))?
    }
}

fn compile_glob(pattern: &str) -> RegistryResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| RegistryError::Glob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn walk_matches(
    matcher: &GlobMatcher,
    root: &Path,
    recursive: bool,
) -> RegistryResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(SHALLOW_SEARCH_DEPTH);
    }

    let mut matches = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable subdirectories are skipped, the root itself is not
                if e.depth() == 0 {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(RegistryError::io(path, source));
                }
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            if matcher.is_match(relative) {
                matches.push(relative.to_path_buf());
            }
        }
    }
    Ok(matches)
}

fn copy_tree(src: &Path, dst: &Path) -> RegistryResult<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::io(parent, e))?;
        }
        std::fs::copy(src, dst).map_err(|e| RegistryError::io(src, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            RegistryError::io(
                path,
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            )
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| RegistryError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| RegistryError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "{}").unwrap();
    }

    #[tokio::test]
    async fn search_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();

        let found = fs
            .search_glob("**/kernel.json", &dir.path().join("missing"), true)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn search_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("python3/kernel.json"));
        touch(&dir.path().join("nested/deeper/kernel.json"));
        touch(&dir.path().join("python3/logo.png"));

        let fs = LocalFileSystem::new();
        let shallow = fs
            .search_glob("**/kernel.json", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(shallow, vec![PathBuf::from("python3/kernel.json")]);

        let deep = fs
            .search_glob("**/kernel.json", dir.path(), true)
            .await
            .unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[tokio::test]
    async fn invalid_glob_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let result = fs.search_glob("[", dir.path(), true).await;
        assert!(matches!(result, Err(RegistryError::Glob { .. })));
    }

    #[tokio::test]
    async fn copy_and_remove_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src/python3");
        touch(&src.join("kernel.json"));
        touch(&src.join("resources/logo.png"));

        let fs = LocalFileSystem::new();
        let dst = dir.path().join("backup/python3");
        fs.copy_dir(&src, &dst).await.unwrap();
        assert!(fs.exists(&dst.join("kernel.json")).await);
        assert!(fs.exists(&dst.join("resources/logo.png")).await);

        fs.remove(&src).await.unwrap();
        assert!(!fs.exists(&src).await);
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let err = fs.read_file(&dir.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
