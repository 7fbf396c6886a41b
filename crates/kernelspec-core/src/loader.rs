//! Kernel spec loading and normalization
//!
//! Turns a `kernel.json` path (plus, optionally, the interpreter that owns
//! it) into a [`KernelSpecRecord`]. Results are memoized per process in a
//! moka cache; concurrent loads of the same key are coalesced, and a
//! caller giving up never cancels the load for the others.

use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostics;
use crate::error::AdvisoryKind;
use crate::fs::FileSystem;
use crate::spec::{
    is_generated_kernel_name, KernelSpecFile, KernelSpecRecord, PythonInterpreter,
    RegistrationInfo, EDITOR_METADATA_KEY, ORIGINAL_DISPLAY_NAME_KEY, ORIGINAL_SPEC_FILE_KEY,
};
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Display names the default ipykernel install produces
static DEFAULT_PYTHON_DISPLAY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^python\s*(\d+(\.\d+)*)?(\s*\(ipykernel\))?$")
        .expect("default display-name pattern is valid")
});

/// Standard ipykernel launch tokens, ignored when disambiguating names
const STANDARD_LAUNCH_ARGS: &[&str] = &[
    "-m",
    "ipykernel",
    "ipykernel_launcher",
    "-f",
    "{connection_file}",
];

/// Memoization key: spec file plus owning interpreter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoadKey {
    spec_file: PathBuf,
    interpreter: Option<PathBuf>,
}

/// Loads and normalizes kernel spec files
#[derive(Clone)]
pub struct SpecLoader {
    fs: Arc<dyn FileSystem>,
    quarantine_folder: Arc<str>,
    cache: Cache<LoadKey, Option<KernelSpecRecord>>,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for SpecLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecLoader")
            .field("quarantine_folder", &self.quarantine_folder)
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl SpecLoader {
    /// Create loader
    #[must_use]
    pub fn new(
        fs: Arc<dyn FileSystem>,
        quarantine_folder: &str,
        capacity: u64,
        ttl: Option<Duration>,
        diagnostics: Diagnostics,
    ) -> Self {
        let mut builder = Cache::builder().max_capacity(capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            fs,
            quarantine_folder: Arc::from(quarantine_folder),
            cache: builder.build(),
            diagnostics,
        }
    }

    /// Whether `path` lies inside a quarantine folder
    #[must_use]
    pub fn is_quarantined(&self, path: &Path) -> bool {
        path.components()
            .any(|c| c.as_os_str() == &*self.quarantine_folder)
    }

    /// Load one kernel spec
    ///
    /// Returns `None` for quarantined paths, unreadable or malformed files,
    /// specs whose interpreter no longer exists, and on cancellation.
    /// Cancellation only affects this caller: the shared load keeps running
    /// for concurrent callers of the same key.
    pub async fn load(
        &self,
        spec_file: &Path,
        interpreter: Option<&PythonInterpreter>,
        cancel: &CancelToken,
    ) -> Option<KernelSpecRecord> {
        if self.is_quarantined(spec_file) {
            tracing::debug!(path = %spec_file.display(), "ignoring quarantined kernel spec");
            return None;
        }
        if cancel.is_requested() {
            return None;
        }

        let key = LoadKey {
            spec_file: spec_file.to_path_buf(),
            interpreter: interpreter.map(|i| i.path.clone()),
        };
        let loaded = tokio::select! {
            biased;
            () = cancel.requested() => None,
            loaded = self
                .cache
                .get_with(key, self.load_uncached(spec_file, interpreter)) => Some(loaded),
        };

        match loaded {
            Some(record) if !cancel.is_requested() => record,
            _ => {
                tracing::debug!(path = %spec_file.display(), "kernel spec load cancelled");
                None
            }
        }
    }

    /// Drop every memoized load
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    async fn load_uncached(
        &self,
        spec_file: &Path,
        interpreter: Option<&PythonInterpreter>,
    ) -> Option<KernelSpecRecord> {
        tracing::debug!(
            path = %spec_file.display(),
            interpreter = ?interpreter.map(|i| &i.path),
            "loading kernel spec"
        );
        let bytes = match self.fs.read_file(spec_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let kind = if e.is_not_found() {
                    AdvisoryKind::StaleReference
                } else {
                    AdvisoryKind::ParseFailure
                };
                self.diagnostics
                    .report(kind, format!("failed to read kernel spec: {e}"));
                return None;
            }
        };

        let file = match KernelSpecFile::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                self.diagnostics.report(
                    AdvisoryKind::ParseFailure,
                    format!("failed to parse kernel spec {}: {e}", spec_file.display()),
                );
                return None;
            }
        };

        let record = normalize(file, spec_file, interpreter);

        if let Some(interpreter_path) = record.interpreter_path() {
            if !self.fs.exists(interpreter_path).await {
                tracing::debug!(
                    path = %spec_file.display(),
                    interpreter = %interpreter_path.display(),
                    "kernel spec references a missing interpreter"
                );
                return None;
            }
        }
        Some(record)
    }
}

/// Normalize a parsed spec file into a record
///
/// Pure and deterministic: the same file, path and interpreter always give
/// the same record.
#[must_use]
pub fn normalize(
    file: KernelSpecFile,
    spec_file: &Path,
    interpreter: Option<&PythonInterpreter>,
) -> KernelSpecRecord {
    let KernelSpecFile {
        name,
        display_name,
        language,
        argv,
        env,
        metadata,
    } = file;

    let spec_dir_name = spec_file
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let base_name = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| spec_dir_name.clone());
    let base_name = match interpreter {
        Some(interpreter) => interpreter.kernel_spec_name(),
        None => base_name,
    };
    let name = disambiguate_name(base_name, &display_name, &language, &argv);

    let metadata = normalize_metadata(metadata.unwrap_or_default(), spec_file, &display_name);

    let metadata_interpreter = metadata
        .get("interpreter")
        .and_then(|i| i.get("path"))
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let registration = if is_generated_kernel_name(&spec_dir_name) && metadata_interpreter.is_some()
    {
        RegistrationInfo::RegisteredByExtension
    } else {
        RegistrationInfo::UserRegistered
    };

    let mut record = KernelSpecRecord::new(name, display_name, language, argv)
        .with_env(env.unwrap_or_default())
        .with_metadata(metadata)
        .with_spec_file(spec_file)
        .with_registration(registration);
    if let Some(path) = interpreter.map(|i| i.path.clone()).or(metadata_interpreter) {
        record = record.with_interpreter_path(path);
    }
    record
}

/// Whether a display name is the stock `Python <version>` label
#[inline]
#[must_use]
pub fn is_default_python_display_name(display_name: &str) -> bool {
    DEFAULT_PYTHON_DISPLAY_NAME.is_match(display_name.trim())
}

/// Append non-standard launch arguments to the name
///
/// Custom launch configurations often share a display name; the extra
/// arguments keep their names apart.
fn disambiguate_name(name: String, display_name: &str, language: &str, argv: &[String]) -> String {
    if is_default_python_display_name(display_name)
        || !language.eq_ignore_ascii_case("python")
        || argv.len() <= 2
    {
        return name;
    }
    let extra: Vec<String> = argv
        .iter()
        .skip(1)
        .map(|arg| arg.to_lowercase())
        .filter(|arg| !STANDARD_LAUNCH_ARGS.contains(&arg.as_str()))
        .collect();
    if extra.is_empty() {
        return name;
    }
    format!("{name}#{}", extra.join("#"))
}

fn normalize_metadata(
    mut metadata: Map<String, Value>,
    spec_file: &Path,
    display_name: &str,
) -> Map<String, Value> {
    let legacy_spec_file = metadata.remove(ORIGINAL_SPEC_FILE_KEY);

    let mut editor = match metadata.remove(EDITOR_METADATA_KEY) {
        Some(Value::Object(editor)) => editor,
        _ => Map::new(),
    };
    if let Some(legacy) = legacy_spec_file.filter(Value::is_string) {
        editor.insert(ORIGINAL_SPEC_FILE_KEY.to_string(), legacy);
    }
    editor
        .entry(ORIGINAL_SPEC_FILE_KEY)
        .or_insert_with(|| Value::String(spec_file.to_string_lossy().into_owned()));
    editor
        .entry(ORIGINAL_DISPLAY_NAME_KEY)
        .or_insert_with(|| Value::String(display_name.to_string()));

    metadata.insert(EDITOR_METADATA_KEY.to_string(), Value::Object(editor));
    metadata
}
