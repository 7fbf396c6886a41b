//! Path search cache
//!
//! Globs a search directory for kernel spec files. Concurrent callers for
//! the same target share one in-flight search; the entry is evicted as soon
//! as the search resolves, fails, or a waiting caller is cancelled, so the
//! next call always rescans.

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::error::{AdvisoryFailure, AdvisoryKind};
use crate::fs::FileSystem;
use crate::spec::PythonInterpreter;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where to look for kernel specs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchTarget {
    /// Bare directory, e.g. a Jupyter data path
    Directory(PathBuf),
    /// Directory belonging to an interpreter, e.g. `<prefix>/share/jupyter/kernels`
    Interpreter {
        /// Owning interpreter
        interpreter: PythonInterpreter,
        /// Directory to search
        directory: PathBuf,
    },
}

impl SearchTarget {
    /// Directory target
    #[inline]
    #[must_use]
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    /// Interpreter-owned directory target
    #[inline]
    #[must_use]
    pub fn interpreter(interpreter: PythonInterpreter, directory: impl Into<PathBuf>) -> Self {
        Self::Interpreter {
            interpreter,
            directory: directory.into(),
        }
    }

    /// Directory searched
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Interpreter { directory: path, .. } => path,
        }
    }

    /// Owning interpreter, if any
    #[inline]
    #[must_use]
    pub fn owner(&self) -> Option<&PythonInterpreter> {
        match self {
            Self::Directory(_) => None,
            Self::Interpreter { interpreter, .. } => Some(interpreter),
        }
    }

    fn key(&self) -> SearchKey {
        SearchKey {
            directory: self.path().to_path_buf(),
            interpreter: self.owner().map(PythonInterpreter::id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SearchKey {
    directory: PathBuf,
    interpreter: Option<String>,
}

type SharedSearch = Shared<BoxFuture<'static, Result<Arc<Vec<PathBuf>>, AdvisoryFailure>>>;

struct InFlight {
    generation: u64,
    search: SharedSearch,
}

/// Memoizes in-flight kernel spec searches per target
#[derive(Clone)]
pub struct PathSearchCache {
    fs: Arc<dyn FileSystem>,
    pattern: Arc<str>,
    recursive: bool,
    in_flight: Arc<DashMap<SearchKey, InFlight>>,
    generation: Arc<AtomicU64>,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for PathSearchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSearchCache")
            .field("pattern", &self.pattern)
            .field("recursive", &self.recursive)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl PathSearchCache {
    /// Create cache searching with `pattern`
    #[must_use]
    pub fn new(
        fs: Arc<dyn FileSystem>,
        pattern: &str,
        recursive: bool,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            fs,
            pattern: Arc::from(pattern),
            recursive,
            in_flight: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            diagnostics,
        }
    }

    /// Absolute paths of kernel spec files under the target
    ///
    /// A missing directory, a failed search, and cancellation all yield an
    /// empty list.
    pub async fn search(&self, target: &SearchTarget, cancel: &CancelToken) -> Vec<PathBuf> {
        if cancel.is_requested() {
            return Vec::new();
        }
        let key = target.key();
        let (generation, search) = self.join_or_start(&key);

        let outcome = tokio::select! {
            biased;
            result = search => Some(result),
            () = cancel.requested() => None,
        };
        self.in_flight
            .remove_if(&key, |_, entry| entry.generation == generation);

        match outcome {
            Some(Ok(relative)) => relative.iter().map(|p| key.directory.join(p)).collect(),
            Some(Err(_)) => Vec::new(),
            None => {
                tracing::debug!(directory = %key.directory.display(), "kernel spec search cancelled");
                Vec::new()
            }
        }
    }

    /// Number of searches currently in flight
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forget all in-flight searches; running globs finish unobserved
    pub fn clear(&self) {
        self.in_flight.clear();
    }

    fn join_or_start(&self, key: &SearchKey) -> (u64, SharedSearch) {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::trace!(directory = %key.directory.display(), "joining in-flight search");
                (entry.get().generation, entry.get().search.clone())
            }
            Entry::Vacant(entry) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let search = self.start(key.directory.clone());
                entry.insert(InFlight {
                    generation,
                    search: search.clone(),
                });
                (generation, search)
            }
        }
    }

    fn start(&self, directory: PathBuf) -> SharedSearch {
        let fs = Arc::clone(&self.fs);
        let pattern = Arc::clone(&self.pattern);
        let recursive = self.recursive;
        let diagnostics = self.diagnostics.clone();

        // Spawned so cancellation of every waiter does not stop the glob
        let handle = tokio::spawn(async move {
            if !fs.exists(&directory).await {
                tracing::debug!(directory = %directory.display(), "search directory does not exist");
                return Ok(Arc::new(Vec::new()));
            }
            match fs.search_glob(&pattern, &directory, recursive).await {
                Ok(found) => {
                    tracing::debug!(
                        directory = %directory.display(),
                        count = found.len(),
                        "kernel spec search finished"
                    );
                    Ok(Arc::new(found))
                }
                Err(e) => {
                    let failure = AdvisoryFailure::new(
                        AdvisoryKind::SearchFailure,
                        format!("searching {} failed: {e}", directory.display()),
                    );
                    diagnostics.record(failure.clone());
                    Err(failure)
                }
            }
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(AdvisoryFailure::new(AdvisoryKind::SearchFailure, e.to_string()))
            })
        }
        .boxed()
        .shared()
    }
}
