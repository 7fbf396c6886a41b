//! Kernel spec registry
//!
//! Ties the caches together. `list_kernels` goes through the scope listing
//! cache; on a miss it restores the persisted list for the scope, or, when
//! that is empty or ignored, searches every target, loads each spec,
//! quarantines legacy specs found under the scope's global roots, then
//! dedupes, sorts and persists the result.

use crate::cancel::CancelToken;
use crate::config::RegistryConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{AdvisoryFailure, AdvisoryKind, RegistryResult};
use crate::fs::FileSystem;
use crate::listing::{dedupe_and_sort, ScopeListingCache};
use crate::loader::SpecLoader;
use crate::persisted::PersistedCache;
use crate::presence::ExtensionPresence;
use crate::quarantine::{Quarantine, QuarantineOutcome};
use crate::search::{PathSearchCache, SearchTarget};
use crate::spec::{KernelSpecRecord, PythonInterpreter, RegistrationInfo};
use crate::store::Memento;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A named set of search targets listed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    /// Cache key, e.g. `local`, `remote` or a workspace id
    pub key: String,
    /// Directories to search
    pub targets: Vec<SearchTarget>,
    /// Shared install roots where legacy specs are quarantined
    pub global_roots: Vec<PathBuf>,
    /// Whether the listing must refresh when the runtime extension's
    /// installed state changes
    pub depends_on_runtime_extension: bool,
}

impl SearchScope {
    /// Empty scope
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            targets: Vec::new(),
            global_roots: Vec::new(),
            depends_on_runtime_extension: false,
        }
    }

    /// Add a bare directory target
    #[must_use]
    pub fn with_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.targets.push(SearchTarget::directory(path));
        self
    }

    /// Add an interpreter-owned directory target
    #[must_use]
    pub fn with_interpreter(
        mut self,
        interpreter: PythonInterpreter,
        directory: impl Into<PathBuf>,
    ) -> Self {
        self.targets
            .push(SearchTarget::interpreter(interpreter, directory));
        self
    }

    /// Add a shared install root
    #[must_use]
    pub fn with_global_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_roots.push(path.into());
        self
    }

    /// Mark the listing as dependent on the runtime extension
    #[must_use]
    pub fn depending_on_runtime_extension(mut self, depends: bool) -> Self {
        self.depends_on_runtime_extension = depends;
        self
    }

    /// Whether `path` lies under one of the global roots
    #[must_use]
    pub fn is_under_global_root(&self, path: &Path) -> bool {
        self.global_roots.iter().any(|root| path.starts_with(root))
    }
}

/// Discovers, normalizes and caches kernel specs
#[derive(Clone)]
pub struct KernelSpecRegistry {
    config: Arc<RegistryConfig>,
    search: PathSearchCache,
    loader: SpecLoader,
    listing: ScopeListingCache,
    persisted: PersistedCache,
    quarantine: Quarantine,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for KernelSpecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSpecRegistry")
            .field("extension_version", &self.config.extension_version)
            .field("search", &self.search)
            .field("loader", &self.loader)
            .field("listing", &self.listing)
            .finish_non_exhaustive()
    }
}

impl KernelSpecRegistry {
    /// Create registry over the given collaborators
    ///
    /// # Errors
    /// - `RegistryError::Config` if the configuration is invalid
    pub fn new(
        config: RegistryConfig,
        fs: Arc<dyn FileSystem>,
        store: Arc<dyn Memento>,
        presence: Arc<dyn ExtensionPresence>,
    ) -> RegistryResult<Self> {
        config.validate()?;
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);

        let search = PathSearchCache::new(
            Arc::clone(&fs),
            &config.kernel_spec_glob,
            config.recursive_search,
            diagnostics.clone(),
        );
        let loader = SpecLoader::new(
            Arc::clone(&fs),
            &config.quarantine_folder_name,
            config.loaded_spec_cache_capacity,
            config.loaded_spec_ttl(),
            diagnostics.clone(),
        );
        let persisted = PersistedCache::new(
            store,
            Arc::clone(&fs),
            &config.extension_version,
            &config.persisted_key_prefix,
            config.legacy_persisted_keys.clone(),
            diagnostics.clone(),
        );
        let quarantine = Quarantine::new(fs, &config.quarantine_folder_name, diagnostics.clone());

        tracing::debug!(
            version = %config.extension_version,
            glob = %config.kernel_spec_glob,
            "kernel spec registry created"
        );
        Ok(Self {
            config: Arc::new(config),
            search,
            loader,
            listing: ScopeListingCache::new(presence),
            persisted,
            quarantine,
            diagnostics,
        })
    }

    /// Kernels for a scope, deduplicated and sorted by display name
    ///
    /// `ignore_cache` bypasses every cache level and always rescans.
    /// Cancellation returns an empty list to this caller only: discovery
    /// runs on behalf of the scope and completes for every other caller.
    pub async fn list_kernels(
        &self,
        scope: &SearchScope,
        cancel: &CancelToken,
        ignore_cache: bool,
    ) -> Vec<KernelSpecRecord> {
        if cancel.is_requested() {
            return Vec::new();
        }
        if ignore_cache {
            self.loader.clear();
        }

        let registry = self.clone();
        let owned_scope = scope.clone();
        let kernels = self
            .listing
            .list(
                &scope.key,
                scope.depends_on_runtime_extension,
                move || async move {
                    registry
                        .discover_or_restore(&owned_scope, ignore_cache)
                        .await
                },
                ignore_cache,
                cancel,
            )
            .await;

        if cancel.is_requested() {
            self.diagnostics.report(
                AdvisoryKind::Cancelled,
                format!("listing kernels for '{}' was cancelled", scope.key),
            );
            return Vec::new();
        }
        kernels
    }

    /// Kernel spec files under one target, see [`PathSearchCache::search`]
    pub async fn search(&self, target: &SearchTarget, cancel: &CancelToken) -> Vec<PathBuf> {
        self.search.search(target, cancel).await
    }

    /// Load and normalize one spec file, see [`SpecLoader::load`]
    pub async fn load_kernel_spec(
        &self,
        spec_file: &Path,
        interpreter: Option<&PythonInterpreter>,
        cancel: &CancelToken,
    ) -> Option<KernelSpecRecord> {
        self.loader.load(spec_file, interpreter, cancel).await
    }

    /// Move a legacy spec into the quarantine folder
    pub async fn quarantine(&self, spec_file: &Path) -> QuarantineOutcome {
        self.quarantine.quarantine(spec_file).await
    }

    /// Quarantine folders written by this registry
    #[must_use]
    pub fn quarantined_locations(&self) -> Vec<PathBuf> {
        self.quarantine.quarantined_locations()
    }

    /// Persisted kernels for a scope that are still valid
    pub async fn load_persisted(&self, scope_key: &str) -> Vec<KernelSpecRecord> {
        self.persisted.load(scope_key).await
    }

    /// Persist a scope's kernels under the running version
    pub async fn save_persisted(&self, scope_key: &str, records: &[KernelSpecRecord]) {
        self.persisted.save(scope_key, records).await;
    }

    /// Whether a restored record still points at existing files
    pub async fn is_valid_cached_kernel(&self, record: &KernelSpecRecord) -> bool {
        self.persisted.is_valid_cached_kernel(record).await
    }

    /// Remove every persisted slot owned by the registry
    ///
    /// Returns the number of keys removed.
    pub async fn clear_persisted(&self) -> usize {
        self.persisted.clear_all().await
    }

    /// Drop every in-process cache level
    pub fn clear_caches(&self) {
        self.listing.clear();
        self.loader.clear();
        self.search.clear();
    }

    /// Advisory failures recorded so far
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Shorthand for the recorded failures, oldest first
    #[must_use]
    pub fn advisory_failures(&self) -> Vec<AdvisoryFailure> {
        self.diagnostics.snapshot()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Restore or rediscover a scope's kernels
    ///
    /// Runs detached from any caller, so it never observes a caller's
    /// cancellation.
    async fn discover_or_restore(
        &self,
        scope: &SearchScope,
        ignore_cache: bool,
    ) -> Vec<KernelSpecRecord> {
        if !ignore_cache {
            let restored = self.persisted.load(&scope.key).await;
            if !restored.is_empty() {
                tracing::debug!(scope = %scope.key, count = restored.len(), "using persisted kernels");
                return restored;
            }
        }

        let found = join_all(
            scope
                .targets
                .iter()
                .map(|target| self.discover_target(scope, target)),
        )
        .await;

        let kernels = dedupe_and_sort(found.into_iter().flatten().collect());
        tracing::debug!(scope = %scope.key, count = kernels.len(), "discovered kernels");
        self.persisted.save(&scope.key, &kernels).await;
        kernels
    }

    async fn discover_target(
        &self,
        scope: &SearchScope,
        target: &SearchTarget,
    ) -> Vec<KernelSpecRecord> {
        let cancel = CancelToken::none();
        let paths = self.search.search(target, &cancel).await;
        let loaded = join_all(
            paths
                .iter()
                .map(|path| self.loader.load(path, target.owner(), &cancel)),
        )
        .await;

        let mut records = Vec::with_capacity(loaded.len());
        for record in loaded.into_iter().flatten() {
            match record.spec_file_path() {
                Some(spec_file)
                    if record.registration() == RegistrationInfo::RegisteredByExtension
                        && scope.is_under_global_root(spec_file) =>
                {
                    self.quarantine.quarantine(spec_file).await;
                }
                _ => records.push(record),
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::presence::StaticPresence;
    use crate::store::InMemoryMemento;

    fn registry() -> KernelSpecRegistry {
        KernelSpecRegistry::new(
            RegistryConfig::default().with_extension_version("1.0.0"),
            Arc::new(LocalFileSystem::new()),
            Arc::new(InMemoryMemento::new()),
            Arc::new(StaticPresence::new(false)),
        )
        .unwrap()
    }

    #[test]
    fn scope_global_roots() {
        let scope = SearchScope::new("local")
            .with_directory("/home/me/.local/share/jupyter/kernels")
            .with_global_root("/usr/share/jupyter");
        assert!(scope.is_under_global_root(Path::new("/usr/share/jupyter/kernels/py/kernel.json")));
        assert!(!scope.is_under_global_root(Path::new("/home/me/.local/share/jupyter/kernels")));
        assert_eq!(scope.targets.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = KernelSpecRegistry::new(
            RegistryConfig::default().with_extension_version(""),
            Arc::new(LocalFileSystem::new()),
            Arc::new(InMemoryMemento::new()),
            Arc::new(StaticPresence::new(false)),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_scope_lists_nothing() {
        let kernels = registry()
            .list_kernels(&SearchScope::new("local"), &CancelToken::none(), false)
            .await;
        assert!(kernels.is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_listing_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let source = crate::cancel::CancelSource::new();
        source.cancel();

        let scope = SearchScope::new("local").with_directory(dir.path());
        assert!(registry.list_kernels(&scope, &source.token(), false).await.is_empty());
        assert!(!registry.listing.contains("local"));
    }
}
