//! Scope-level listing cache
//!
//! One slot per scope key holds the shared result of the last search for
//! that scope. Concurrent callers share the pending search, which runs in
//! its own task: a caller that gives up gets an empty list while the search
//! completes for everyone else. A slot is replaced when the caller ignores
//! the cache, or when the slot depends on the companion runtime extension
//! and its installed state has flipped.

use crate::cancel::CancelToken;
use crate::presence::ExtensionPresence;
use crate::spec::KernelSpecRecord;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

type SharedListing = Shared<BoxFuture<'static, Arc<Vec<KernelSpecRecord>>>>;

struct ScopeSlot {
    depends_on_runtime_extension: bool,
    runtime_installed_at_cache_time: bool,
    result: SharedListing,
}

impl ScopeSlot {
    fn is_stale(&self, runtime_installed: bool) -> bool {
        self.depends_on_runtime_extension
            && self.runtime_installed_at_cache_time != runtime_installed
    }
}

/// Per-scope cache of deduplicated, sorted kernel lists
#[derive(Clone)]
pub struct ScopeListingCache {
    slots: Arc<DashMap<String, ScopeSlot>>,
    presence: Arc<dyn ExtensionPresence>,
}

impl std::fmt::Debug for ScopeListingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeListingCache")
            .field("scopes", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ScopeListingCache {
    /// Create empty cache
    #[must_use]
    pub fn new(presence: Arc<dyn ExtensionPresence>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            presence,
        }
    }

    /// Kernels for a scope, searching only when the slot is missing or stale
    ///
    /// `search` is invoked at most once per fresh slot; callers arriving
    /// while it runs await the same result. `ignore_cache` always starts a
    /// new search, regardless of the dependency check. `search` must not
    /// observe any single caller's cancellation; `cancel` only ends this
    /// caller's wait.
    pub async fn list<F, Fut>(
        &self,
        scope_key: &str,
        depends_on_runtime_extension: bool,
        search: F,
        ignore_cache: bool,
        cancel: &CancelToken,
    ) -> Vec<KernelSpecRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<KernelSpecRecord>> + Send + 'static,
    {
        let runtime_installed = self.presence.is_installed();
        let fresh_slot = |search: F| ScopeSlot {
            depends_on_runtime_extension,
            runtime_installed_at_cache_time: runtime_installed,
            result: start(search()),
        };

        let result = match self.slots.entry(scope_key.to_string()) {
            Entry::Occupied(mut entry) => {
                if ignore_cache || entry.get().is_stale(runtime_installed) {
                    tracing::debug!(scope = scope_key, ignore_cache, "refreshing kernel listing");
                    let slot = fresh_slot(search);
                    let result = slot.result.clone();
                    entry.insert(slot);
                    result
                } else {
                    tracing::trace!(scope = scope_key, "kernel listing cache hit");
                    entry.get().result.clone()
                }
            }
            Entry::Vacant(entry) => {
                let slot = fresh_slot(search);
                let result = slot.result.clone();
                entry.insert(slot);
                result
            }
        };

        tokio::select! {
            biased;
            () = cancel.requested() => {
                tracing::debug!(scope = scope_key, "kernel listing wait cancelled");
                Vec::new()
            }
            kernels = result => Vec::clone(&*kernels),
        }
    }

    /// Drop the slot for one scope
    pub fn invalidate(&self, scope_key: &str) {
        self.slots.remove(scope_key);
    }

    /// Drop every slot
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Whether a slot exists for the scope
    #[inline]
    #[must_use]
    pub fn contains(&self, scope_key: &str) -> bool {
        self.slots.contains_key(scope_key)
    }
}

fn start<Fut>(search: Fut) -> SharedListing
where
    Fut: Future<Output = Vec<KernelSpecRecord>> + Send + 'static,
{
    // Spawned so the search outlives callers that stop waiting
    let handle = tokio::spawn(async move { dedupe_and_sort(search.await) });
    async move {
        match handle.await {
            Ok(kernels) => Arc::new(kernels),
            Err(e) => {
                tracing::error!(error = %e, "kernel listing task failed");
                Arc::new(Vec::new())
            }
        }
    }
    .boxed()
    .shared()
}

/// Remove duplicate ids (first occurrence wins) and sort by display name
///
/// Sorting is case-insensitive and stable; ties keep discovery order.
#[must_use]
pub fn dedupe_and_sort(records: Vec<KernelSpecRecord>) -> Vec<KernelSpecRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut unique: Vec<KernelSpecRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.id()))
        .collect();
    unique.sort_by_key(|record| record.display_name().to_lowercase());
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{MockExtensionPresence, StaticPresence};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str, display: &str) -> KernelSpecRecord {
        KernelSpecRecord::new(name, display, "python", vec!["python".to_string()])
    }

    fn counting_search(
        calls: &Arc<AtomicUsize>,
        records: Vec<KernelSpecRecord>,
    ) -> impl FnOnce() -> BoxFuture<'static, Vec<KernelSpecRecord>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { records }.boxed()
        }
    }

    #[test]
    fn dedupes_by_id_keeping_first() {
        let a = record("python3", "Python 3").with_spec_file("/a/python3/kernel.json");
        let b = record("python3", "Python 3 copy").with_spec_file("/b/python3/kernel.json");
        let out = dedupe_and_sort(vec![a.clone(), b]);
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn sorts_case_insensitively() {
        let out = dedupe_and_sort(vec![
            record("c", "zeta"),
            record("a", "Alpha"),
            record("b", "beta"),
        ]);
        let names: Vec<_> = out.iter().map(KernelSpecRecord::display_name).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[tokio::test]
    async fn cached_until_ignored() {
        let cache = ScopeListingCache::new(Arc::new(StaticPresence::new(false)));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .list(
                "local",
                false,
                counting_search(&calls, vec![record("a", "A")]),
                false,
                &CancelToken::none(),
            )
            .await;
        let second = cache
            .list(
                "local",
                false,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let refreshed = cache
            .list(
                "local",
                false,
                counting_search(&calls, Vec::new()),
                true,
                &CancelToken::none(),
            )
            .await;
        assert!(refreshed.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let cache = ScopeListingCache::new(Arc::new(StaticPresence::new(false)));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .list(
                "local",
                false,
                counting_search(&calls, vec![record("a", "A")]),
                false,
                &CancelToken::none(),
            )
            .await;
        let remote = cache
            .list(
                "remote",
                false,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        assert!(remote.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.contains("local"));

        cache.invalidate("local");
        assert!(!cache.contains("local"));
    }

    #[tokio::test]
    async fn presence_flip_refreshes_dependent_slot() {
        let mut presence = MockExtensionPresence::new();
        let mut seq = mockall::Sequence::new();
        for installed in [false, false, true] {
            presence
                .expect_is_installed()
                .times(1)
                .in_sequence(&mut seq)
                .return_const(installed);
        }
        let cache = ScopeListingCache::new(Arc::new(presence));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .list(
                "local",
                true,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        cache
            .list(
                "local",
                true,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let after_install = cache
            .list(
                "local",
                true,
                counting_search(&calls, vec![record("a", "A")]),
                false,
                &CancelToken::none(),
            )
            .await;
        assert_eq!(after_install.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn presence_flip_ignored_for_independent_slot() {
        let presence = Arc::new(StaticPresence::new(false));
        let cache = ScopeListingCache::new(presence.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .list(
                "local",
                false,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        presence.set_installed(true);
        cache
            .list(
                "local",
                false,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_search() {
        let cache = ScopeListingCache::new(Arc::new(StaticPresence::new(false)));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .list(
                        "local",
                        false,
                        move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async move {
                                let _ = rx.await;
                                vec![record("a", "A")]
                            }
                        },
                        false,
                        &CancelToken::none(),
                    )
                    .await
            })
        };
        while !cache.contains("local") {
            tokio::task::yield_now().await;
        }
        let second = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .list(
                        "local",
                        false,
                        counting_search(&calls, Vec::new()),
                        false,
                        &CancelToken::none(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_search_running_for_others() {
        let cache = ScopeListingCache::new(Arc::new(StaticPresence::new(false)));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let source = crate::cancel::CancelSource::new();

        let cancelled = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let token = source.token();
            tokio::spawn(async move {
                cache
                    .list(
                        "local",
                        false,
                        move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async move {
                                let _ = rx.await;
                                vec![record("a", "A")]
                            }
                        },
                        false,
                        &token,
                    )
                    .await
            })
        };
        while !cache.contains("local") {
            tokio::task::yield_now().await;
        }
        source.cancel();
        assert!(cancelled.await.unwrap().is_empty());
        assert!(cache.contains("local"));

        tx.send(()).unwrap();
        let later = cache
            .list(
                "local",
                false,
                counting_search(&calls, Vec::new()),
                false,
                &CancelToken::none(),
            )
            .await;
        assert_eq!(later.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
