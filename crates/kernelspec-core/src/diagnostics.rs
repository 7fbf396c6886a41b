//! Diagnostic channel for advisory failures
//!
//! Best-effort operations (quarantine, stale-slot cleanup, parse errors)
//! report here instead of returning `Err`. The sink keeps the most recent
//! failures up to a fixed capacity.

use crate::error::{AdvisoryFailure, AdvisoryKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared, bounded sink of advisory failures
#[derive(Debug, Clone)]
pub struct Diagnostics {
    inner: Arc<Mutex<VecDeque<AdvisoryFailure>>>,
    capacity: usize,
}

impl Diagnostics {
    /// Create sink keeping at most `capacity` failures
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Record a failure and log it
    ///
    /// Parse failures log at error level, everything else at warn.
    pub fn record(&self, failure: AdvisoryFailure) {
        match failure.kind {
            AdvisoryKind::ParseFailure => {
                tracing::error!(kind = %failure.kind, "{}", failure.message);
            }
            _ => tracing::warn!(kind = %failure.kind, "{}", failure.message),
        }
        let mut guard = self.inner.lock();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(failure);
    }

    /// Shorthand for [`Diagnostics::record`]
    pub fn report(&self, kind: AdvisoryKind, message: impl Into<String>) {
        self.record(AdvisoryFailure::new(kind, message));
    }

    /// Snapshot of recorded failures, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdvisoryFailure> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Count failures of one kind
    #[must_use]
    pub fn count(&self, kind: AdvisoryKind) -> usize {
        self.inner.lock().iter().filter(|f| f.kind == kind).count()
    }

    /// Remove and return all recorded failures
    pub fn drain(&self) -> Vec<AdvisoryFailure> {
        self.inner.lock().drain(..).collect()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(256)
    }
}
