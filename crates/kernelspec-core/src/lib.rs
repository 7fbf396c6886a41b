//! Kernel Spec Registry
//!
//! Discovery, normalization and caching of Jupyter kernel specifications
//! (`kernel.json`) found on local search paths.
//!
//! # Cache Levels
//!
//! - **Loaded specs**: spec file + interpreter → normalized record, per process
//! - **Path searches**: in-flight globs per search target, shared by callers
//! - **Persisted lists**: per-scope kernel lists in a key-value store, tagged
//!   with the running extension version
//!
//! # Architecture
//!
//! ```text
//! list_kernels(scope)
//!   → ScopeListingCache ──hit──→ kernels
//!   → PersistedCache (version + file checks) ──non-empty──→ kernels
//!   → PathSearchCache → SpecLoader → Quarantine (legacy specs)
//!   → dedupe by id → sort by display name → persist
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kernelspec_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = KernelSpecRegistry::new(
//!     RegistryConfig::default(),
//!     Arc::new(LocalFileSystem::new()),
//!     Arc::new(InMemoryMemento::new()),
//!     Arc::new(StaticPresence::new(false)),
//! )?;
//!
//! let scope = SearchScope::new("local").with_directory("/usr/share/jupyter/kernels");
//! for kernel in registry.list_kernels(&scope, &CancelToken::none(), false).await {
//!     println!("{} ({})", kernel.display_name(), kernel.name());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod listing;
pub mod loader;
pub mod logging;
pub mod persisted;
pub mod presence;
pub mod quarantine;
pub mod registry;
pub mod search;
pub mod spec;
pub mod store;

// Re-exports for convenience
pub use cancel::{CancelSource, CancelToken};
pub use config::RegistryConfig;
pub use diagnostics::Diagnostics;
pub use error::{AdvisoryFailure, AdvisoryKind, RegistryError, RegistryResult};
pub use fs::{FileSystem, LocalFileSystem};
pub use presence::{ExtensionPresence, StaticPresence};
pub use quarantine::QuarantineOutcome;
pub use registry::{KernelSpecRegistry, SearchScope};
pub use search::SearchTarget;
pub use spec::{KernelSpecRecord, PythonInterpreter, RegistrationInfo};
pub use store::{InMemoryMemento, JsonFileMemento, Memento};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the registry
    pub use crate::cancel::{CancelSource, CancelToken};
    pub use crate::config::RegistryConfig;
    pub use crate::error::{AdvisoryKind, RegistryError, RegistryResult};
    pub use crate::fs::{FileSystem, LocalFileSystem};
    pub use crate::presence::{ExtensionPresence, StaticPresence};
    pub use crate::registry::{KernelSpecRegistry, SearchScope};
    pub use crate::search::SearchTarget;
    pub use crate::spec::{KernelSpecRecord, PythonInterpreter, RegistrationInfo};
    pub use crate::store::{InMemoryMemento, JsonFileMemento, Memento};
}
