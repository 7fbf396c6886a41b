//! Error types for the kernel spec registry
//!
//! Two families of failure exist:
//! - [`RegistryError`]: an operation on a collaborator (file system, store,
//!   configuration) failed outright.
//! - [`AdvisoryFailure`]: a non-critical failure that the registry recovers
//!   from locally. These are recorded in the diagnostics channel and never
//!   surfaced to callers as `Err`.

use std::fmt;
use std::path::PathBuf;

/// Errors raised by registry collaborators
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// IO error on a path
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("invalid json in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid glob pattern
    #[error("invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    /// Key-value store failure
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Background task failed to complete
    #[error("task failed: {0}")]
    Task(String),
}

impl RegistryError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create JSON error with context
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Whether the error means the path simply does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Classification of a recovered failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvisoryKind {
    /// Malformed kernel spec file
    ParseFailure,
    /// Spec file or interpreter no longer exists
    StaleReference,
    /// Persisted cache written by another extension version
    VersionMismatch,
    /// Operation observed a cancellation request
    Cancelled,
    /// Quarantine copy or delete failed
    ArchivalFailure,
    /// Stale persisted slot could not be pruned
    CleanupFailure,
    /// Directory search failed
    SearchFailure,
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ParseFailure => "parse-failure",
            Self::StaleReference => "stale-reference",
            Self::VersionMismatch => "version-mismatch",
            Self::Cancelled => "cancelled",
            Self::ArchivalFailure => "archival-failure",
            Self::CleanupFailure => "cleanup-failure",
            Self::SearchFailure => "search-failure",
        };
        f.write_str(label)
    }
}

/// A failure the registry recovered from
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AdvisoryFailure {
    /// Failure classification
    pub kind: AdvisoryKind,
    /// Human-readable detail
    pub message: String,
}

impl AdvisoryFailure {
    /// Create advisory failure
    #[inline]
    pub fn new(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result type alias for registry collaborator operations
pub type RegistryResult<T> = Result<T, RegistryError>;
