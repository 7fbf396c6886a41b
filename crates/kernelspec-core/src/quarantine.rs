//! Legacy kernel spec quarantine
//!
//! Specs an earlier version registered in a shared install root are moved
//! aside: the spec directory is copied to
//! `<kernels dir>/<quarantine folder>/<spec dir>` and the original removed.
//! The loader never returns anything under a quarantine folder.

use crate::diagnostics::Diagnostics;
use crate::error::{AdvisoryFailure, AdvisoryKind};
use crate::fs::FileSystem;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of quarantining one spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineOutcome {
    /// Archive copy, when the copy succeeded
    pub archived_to: Option<PathBuf>,
    /// Whether the original directory was deleted
    pub removed: bool,
    /// Failures recorded along the way
    #[serde(skip)]
    pub failures: Vec<AdvisoryFailure>,
}

impl QuarantineOutcome {
    /// Copied and deleted without failures
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.archived_to.is_some() && self.removed && self.failures.is_empty()
    }
}

/// Moves legacy specs into the quarantine folder
#[derive(Clone)]
pub struct Quarantine {
    fs: Arc<dyn FileSystem>,
    folder_name: Arc<str>,
    locations: Arc<Mutex<BTreeSet<PathBuf>>>,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for Quarantine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarantine")
            .field("folder_name", &self.folder_name)
            .field("locations", &self.locations.lock().len())
            .finish_non_exhaustive()
    }
}

impl Quarantine {
    /// Create quarantine writing into folders named `folder_name`
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, folder_name: &str, diagnostics: Diagnostics) -> Self {
        Self {
            fs,
            folder_name: Arc::from(folder_name),
            locations: Arc::new(Mutex::new(BTreeSet::new())),
            diagnostics,
        }
    }

    /// Archive location for a spec file, if its directory has a parent
    #[must_use]
    pub fn archive_path(&self, spec_file: &Path) -> Option<PathBuf> {
        let spec_dir = spec_file.parent()?;
        let root = spec_dir.parent()?;
        let dir_name = spec_dir.file_name()?;
        Some(root.join(&*self.folder_name).join(dir_name))
    }

    /// Copy the spec's directory aside, then delete the original
    ///
    /// A failed copy does not stop the delete. Failures are recorded on the
    /// diagnostics channel and returned in the outcome.
    pub async fn quarantine(&self, spec_file: &Path) -> QuarantineOutcome {
        let mut outcome = QuarantineOutcome::default();
        let (Some(spec_dir), Some(archive)) = (spec_file.parent(), self.archive_path(spec_file))
        else {
            outcome.failures.push(self.fail(
                AdvisoryKind::ArchivalFailure,
                format!("cannot quarantine {}: no parent directory", spec_file.display()),
            ));
            return outcome;
        };

        if let Some(folder) = archive.parent() {
            self.locations.lock().insert(folder.to_path_buf());
        }

        let copied = match self.fs.create_dir_all(&archive).await {
            Ok(()) => self.fs.copy_dir(spec_dir, &archive).await,
            Err(e) => Err(e),
        };
        match copied {
            Ok(()) => outcome.archived_to = Some(archive.clone()),
            Err(e) => outcome.failures.push(self.fail(
                AdvisoryKind::ArchivalFailure,
                format!("failed to archive {} to {}: {e}", spec_dir.display(), archive.display()),
            )),
        }

        match self.fs.remove(spec_dir).await {
            Ok(()) => outcome.removed = true,
            Err(e) => outcome.failures.push(self.fail(
                AdvisoryKind::CleanupFailure,
                format!("failed to delete {}: {e}", spec_dir.display()),
            )),
        }

        tracing::info!(
            spec = %spec_file.display(),
            archive = %archive.display(),
            removed = outcome.removed,
            "quarantined legacy kernel spec"
        );
        outcome
    }

    /// Quarantine folders written so far
    #[must_use]
    pub fn quarantined_locations(&self) -> Vec<PathBuf> {
        self.locations.lock().iter().cloned().collect()
    }

    fn fail(&self, kind: AdvisoryKind, message: String) -> AdvisoryFailure {
        let failure = AdvisoryFailure::new(kind, message);
        self.diagnostics.record(failure.clone());
        failure
    }
}
