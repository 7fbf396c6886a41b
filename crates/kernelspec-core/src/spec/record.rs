//! Canonical kernel spec record and interpreter identity

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Metadata key of the nested editor-scoped object
pub const EDITOR_METADATA_KEY: &str = "editor";
/// Editor metadata key recording the spec file a record came from
pub const ORIGINAL_SPEC_FILE_KEY: &str = "originalSpecFile";
/// Editor metadata key recording the display name read from disk
pub const ORIGINAL_DISPLAY_NAME_KEY: &str = "originalDisplayName";

/// Names this tool generated for interpreter kernels: `python<ver><hash8>`
static GENERATED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^python\d*[0-9a-f]{8}$").expect("generated-name pattern is valid")
});

/// Provenance of a kernel spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistrationInfo {
    /// Registered by the user or a third-party installer
    UserRegistered,
    /// Registered by this tool in an earlier run
    RegisteredByExtension,
    /// Synthetic spec with no registration on disk
    #[default]
    NotRegistered,
}

impl fmt::Display for RegistrationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UserRegistered => "user",
            Self::RegisteredByExtension => "extension",
            Self::NotRegistered => "none",
        })
    }
}

/// Python interpreter owning a set of kernel specs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PythonInterpreter {
    /// Executable path; this is the interpreter's identity
    pub path: PathBuf,
    /// Interpreter version, e.g. `3.9.1`
    pub version: Option<String>,
    /// Friendly name
    pub display_name: Option<String>,
}

impl PythonInterpreter {
    /// Create interpreter from executable path
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: None,
            display_name: None,
        }
    }

    /// With version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Stable identity string
    #[inline]
    #[must_use]
    pub fn id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Kernel spec name derived from this interpreter
    ///
    /// `python` + major/minor digits + first 8 hex chars of SHA-256 of the
    /// interpreter path, lower-cased. Deterministic for a given interpreter.
    #[must_use]
    pub fn kernel_spec_name(&self) -> String {
        let version: String = self
            .version
            .as_deref()
            .map(|v| {
                v.split('.')
                    .take(2)
                    .flat_map(|part| part.chars().take_while(char::is_ascii_digit))
                    .collect()
            })
            .unwrap_or_default();
        let digest = Sha256::digest(self.id().as_bytes());
        let hash = hex::encode(&digest[..4]);
        format!("python{version}{hash}").to_lowercase()
    }
}

/// Whether a kernel spec directory name looks generated by this tool
#[inline]
#[must_use]
pub fn is_generated_kernel_name(name: &str) -> bool {
    GENERATED_NAME.is_match(name)
}

/// Canonical, immutable representation of one discovered kernel
///
/// Normalization steps consume a record and return a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSpecRecord {
    name: String,
    display_name: String,
    language: String,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    spec_file_path: Option<PathBuf>,
    interpreter_path: Option<PathBuf>,
    metadata: Map<String, Value>,
    registration: RegistrationInfo,
}

impl KernelSpecRecord {
    /// Create record
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        language: impl Into<String>,
        argv: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            language: language.into(),
            argv,
            env: BTreeMap::new(),
            spec_file_path: None,
            interpreter_path: None,
            metadata: Map::new(),
            registration: RegistrationInfo::NotRegistered,
        }
    }

    /// With name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With spec file path
    #[inline]
    #[must_use]
    pub fn with_spec_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec_file_path = Some(path.into());
        self
    }

    /// With interpreter path
    #[inline]
    #[must_use]
    pub fn with_interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = Some(path.into());
        self
    }

    /// With metadata map
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// With launch environment
    #[inline]
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// With registration info
    #[inline]
    #[must_use]
    pub fn with_registration(mut self, registration: RegistrationInfo) -> Self {
        self.registration = registration;
        self
    }

    /// Kernel name, unique within a scope
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Kernel language
    #[inline]
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Launch arguments
    #[inline]
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Launch environment
    #[inline]
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Spec file the record was loaded from
    #[inline]
    #[must_use]
    pub fn spec_file_path(&self) -> Option<&Path> {
        self.spec_file_path.as_deref()
    }

    /// Owning interpreter
    #[inline]
    #[must_use]
    pub fn interpreter_path(&self) -> Option<&Path> {
        self.interpreter_path.as_deref()
    }

    /// Free-form metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Provenance
    #[inline]
    #[must_use]
    pub fn registration(&self) -> RegistrationInfo {
        self.registration
    }

    /// Nested editor metadata object
    #[must_use]
    pub fn editor_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .get(EDITOR_METADATA_KEY)
            .and_then(Value::as_object)
    }

    /// `editor.originalSpecFile`
    #[must_use]
    pub fn original_spec_file(&self) -> Option<&str> {
        self.editor_metadata()
            .and_then(|m| m.get(ORIGINAL_SPEC_FILE_KEY))
            .and_then(Value::as_str)
    }

    /// `editor.originalDisplayName`
    #[must_use]
    pub fn original_display_name(&self) -> Option<&str> {
        self.editor_metadata()
            .and_then(|m| m.get(ORIGINAL_DISPLAY_NAME_KEY))
            .and_then(Value::as_str)
    }

    /// `metadata.interpreter.path`, as written on disk
    #[must_use]
    pub fn metadata_interpreter_path(&self) -> Option<&str> {
        self.metadata
            .get("interpreter")
            .and_then(|i| i.get("path"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Record backed only by an interpreter, with no spec file
    #[inline]
    #[must_use]
    pub fn is_interpreter_only(&self) -> bool {
        self.spec_file_path.is_none() && self.interpreter_path.is_some()
    }

    /// Derived identity used for deduplication
    ///
    /// Independent of display name and spec file location: the same kernel
    /// found under two search paths has one id.
    #[must_use]
    pub fn id(&self) -> String {
        let kind = if self.is_interpreter_only() {
            "interpreter"
        } else {
            "kernelspec"
        };
        let program = self.argv.first().map_or("", String::as_str);
        let interpreter = self
            .interpreter_path
            .as_deref()
            .map(|p| p.to_string_lossy())
            .unwrap_or_default();
        format!(
            "{kind}.{}.{}.{program}.{interpreter}",
            self.language, self.name
        )
        .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| (*a).to_string()).collect()
    }

    #[test]
    fn interpreter_name_is_deterministic() {
        let a = PythonInterpreter::new("/usr/bin/python3").with_version("3.9.1");
        let b = PythonInterpreter::new("/usr/bin/python3").with_version("3.9.1");
        let c = PythonInterpreter::new("/opt/conda/bin/python").with_version("3.9.1");

        assert_eq!(a.kernel_spec_name(), b.kernel_spec_name());
        assert_ne!(a.kernel_spec_name(), c.kernel_spec_name());
        assert!(a.kernel_spec_name().starts_with("python39"));
        assert!(is_generated_kernel_name(&a.kernel_spec_name()));
    }

    #[test]
    fn interpreter_name_without_version() {
        let name = PythonInterpreter::new("/usr/bin/python").kernel_spec_name();
        assert_eq!(name.len(), "python".len() + 8);
        assert!(is_generated_kernel_name(&name));
    }

    #[test]
    fn generated_name_pattern() {
        assert!(is_generated_kernel_name("python3a1b2c3d4"));
        assert!(!is_generated_kernel_name("python3"));
        assert!(!is_generated_kernel_name("ir"));
    }

    #[test]
    fn id_ignores_display_name_and_spec_location() {
        let a = KernelSpecRecord::new("python3", "Python 3", "python", argv(&["python"]))
            .with_spec_file("/a/python3/kernel.json");
        let b = KernelSpecRecord::new("python3", "Other", "python", argv(&["python"]))
            .with_spec_file("/b/python3/kernel.json");

        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_distinguishes_interpreters() {
        let base = KernelSpecRecord::new("python3", "Python 3", "python", argv(&["python"]));
        let a = base.clone().with_interpreter_path("/env/a/bin/python");
        let b = base.with_interpreter_path("/env/b/bin/python");
        assert_ne!(a.id(), b.id());
        assert!(a.is_interpreter_only());
        assert!(a.id().starts_with("interpreter."));
    }

    #[test]
    fn metadata_accessors() {
        let metadata = json!({
            "interpreter": {"path": "/usr/bin/python3"},
            "editor": {
                "originalSpecFile": "/k/python3/kernel.json",
                "originalDisplayName": "Python 3"
            }
        });
        let record = KernelSpecRecord::new("python3", "Python 3", "python", Vec::new())
            .with_metadata(metadata.as_object().cloned().unwrap());

        assert_eq!(record.metadata_interpreter_path(), Some("/usr/bin/python3"));
        assert_eq!(record.original_spec_file(), Some("/k/python3/kernel.json"));
        assert_eq!(record.original_display_name(), Some("Python 3"));
    }
}
