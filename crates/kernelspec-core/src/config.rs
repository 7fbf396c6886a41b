//! Registry configuration
//!
//! Defaults are usable as-is; a TOML file and a handful of environment
//! variables can override them.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`RegistryConfig::extension_version`]
pub const ENV_EXTENSION_VERSION: &str = "KERNELSPEC_EXTENSION_VERSION";

/// Environment variable overriding [`RegistryConfig::quarantine_folder_name`]
pub const ENV_QUARANTINE_DIR: &str = "KERNELSPEC_QUARANTINE_DIR";

/// Default name of the folder holding archived legacy kernel specs
pub const DEFAULT_QUARANTINE_FOLDER: &str = "__old_kernelspecs";

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Version of the running extension; persisted caches from other
    /// versions are discarded
    pub extension_version: String,
    /// Folder name (sibling of kernel spec directories) used as quarantine
    pub quarantine_folder_name: String,
    /// Glob matched against paths relative to a search directory
    pub kernel_spec_glob: String,
    /// Descend into nested directories while searching
    pub recursive_search: bool,
    /// Prefix of persisted cache keys; the scope key is appended
    pub persisted_key_prefix: String,
    /// Keys written by older releases, pruned on save
    pub legacy_persisted_keys: Vec<String>,
    /// Maximum entries in the per-process loaded-spec cache
    pub loaded_spec_cache_capacity: u64,
    /// Time-to-live of loaded-spec cache entries, in seconds (0 = no expiry)
    pub loaded_spec_ttl_secs: u64,
    /// Advisory failures retained by the diagnostics sink
    pub diagnostics_capacity: usize,
}

impl RegistryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With extension version
    #[inline]
    #[must_use]
    pub fn with_extension_version(mut self, version: impl Into<String>) -> Self {
        self.extension_version = version.into();
        self
    }

    /// With quarantine folder name
    #[inline]
    #[must_use]
    pub fn with_quarantine_folder_name(mut self, name: impl Into<String>) -> Self {
        self.quarantine_folder_name = name.into();
        self
    }

    /// With persisted key prefix
    #[inline]
    #[must_use]
    pub fn with_persisted_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.persisted_key_prefix = prefix.into();
        self
    }

    /// With legacy persisted keys to prune
    #[inline]
    #[must_use]
    pub fn with_legacy_persisted_keys(mut self, keys: Vec<String>) -> Self {
        self.legacy_persisted_keys = keys;
        self
    }

    /// With loaded-spec cache TTL
    #[inline]
    #[must_use]
    pub fn with_loaded_spec_ttl(mut self, ttl: Duration) -> Self {
        self.loaded_spec_ttl_secs = ttl.as_secs();
        self
    }

    /// Persisted cache key for a scope
    #[inline]
    #[must_use]
    pub fn persisted_key(&self, scope_key: &str) -> String {
        format!("{}{}", self.persisted_key_prefix, scope_key)
    }

    /// Loaded-spec TTL, if any
    #[inline]
    #[must_use]
    pub fn loaded_spec_ttl(&self) -> Option<Duration> {
        (self.loaded_spec_ttl_secs > 0).then(|| Duration::from_secs(self.loaded_spec_ttl_secs))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// - `RegistryError::Config` if the text is not valid configuration
    pub fn from_toml_str(text: &str) -> RegistryResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// - `RegistryError::Io` if the file cannot be read
    /// - `RegistryError::Config` if its content is invalid
    pub fn from_toml_file(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Apply environment variable overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(version) = lookup(ENV_EXTENSION_VERSION).filter(|v| !v.trim().is_empty()) {
            self.extension_version = version.trim().to_string();
        }
        if let Some(folder) = lookup(ENV_QUARANTINE_DIR).filter(|v| !v.trim().is_empty()) {
            self.quarantine_folder_name = folder.trim().to_string();
        }
        self
    }

    /// Validate configuration invariants
    ///
    /// # Errors
    /// - `RegistryError::Config` describing the first violated invariant
    pub fn validate(&self) -> RegistryResult<()> {
        if self.extension_version.trim().is_empty() {
            return Err(RegistryError::Config("extension_version must not be empty".to_string()));
        }
        if self.quarantine_folder_name.is_empty()
            || self.quarantine_folder_name.contains(['/', '\\'])
        {
            return Err(RegistryError::Config(format!(
                "quarantine_folder_name must be a single path component, got '{}'",
                self.quarantine_folder_name
            )));
        }
        if self.kernel_spec_glob.is_empty() {
            return Err(RegistryError::Config("kernel_spec_glob must not be empty".to_string()));
        }
        if self.loaded_spec_cache_capacity == 0 {
            return Err(RegistryError::Config(
                "loaded_spec_cache_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            extension_version: env!("CARGO_PKG_VERSION").to_string(),
            quarantine_folder_name: DEFAULT_QUARANTINE_FOLDER.to_string(),
            kernel_spec_glob: "**/kernel.json".to_string(),
            recursive_search: true,
            persisted_key_prefix: "kernelspecs.".to_string(),
            legacy_persisted_keys: vec![
                "kernelspecs-local".to_string(),
                "kernelspecs-remote".to_string(),
            ],
            loaded_spec_cache_capacity: 1_000,
            loaded_spec_ttl_secs: 0,
            diagnostics_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = RegistryConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.quarantine_folder_name, DEFAULT_QUARANTINE_FOLDER);
        assert_eq!(config.loaded_spec_ttl(), None);
    }

    #[test]
    fn persisted_key_appends_scope() {
        let config = RegistryConfig::new().with_persisted_key_prefix("ks:");
        assert_eq!(config.persisted_key("local"), "ks:local");
    }

    #[test]
    fn parses_partial_toml() {
        let config = RegistryConfig::from_toml_str(
            r#"
            extension_version = "2.1.0"
            recursive_search = false
            loaded_spec_ttl_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.extension_version, "2.1.0");
        assert!(!config.recursive_search);
        assert_eq!(config.loaded_spec_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.kernel_spec_glob, "**/kernel.json");
    }

    #[test]
    fn rejects_nested_quarantine_folder() {
        let result = RegistryConfig::from_toml_str(r#"quarantine_folder_name = "a/b""#);
        assert!(matches!(result, Err(RegistryError::Config(_))));
    }

    #[test]
    fn rejects_empty_version() {
        let config = RegistryConfig::new().with_extension_version("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let config = RegistryConfig::new().with_overrides_from(|key| match key {
            ENV_EXTENSION_VERSION => Some(" 9.9.9 ".to_string()),
            ENV_QUARANTINE_DIR => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.extension_version, "9.9.9");
        assert_eq!(config.quarantine_folder_name, DEFAULT_QUARANTINE_FOLDER);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernelspec.toml");
        std::fs::write(&path, "extension_version = \"3.0.0\"\n").unwrap();

        let config = RegistryConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.extension_version, "3.0.0");
    }
}
