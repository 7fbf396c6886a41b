//! Serialized forms: the on-disk `kernel.json` and the persisted cache entry

use super::record::{KernelSpecRecord, RegistrationInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `kernel.json` as found on disk
///
/// Every field is optional on read; missing values are normalized by the
/// loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecFile {
    /// Kernel name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Kernel language
    #[serde(default)]
    pub language: String,
    /// Launch arguments
    #[serde(default)]
    pub argv: Vec<String>,
    /// Launch environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl KernelSpecFile {
    /// Parse from JSON bytes
    ///
    /// # Errors
    /// - `serde_json::Error` if the bytes are not a kernel spec object
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Wire form of a record stored in the persisted cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedKernel {
    /// Record id at the time it was written (informational)
    #[serde(default)]
    pub id: String,
    /// Kernel name
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Kernel language
    #[serde(default)]
    pub language: String,
    /// Launch arguments
    #[serde(default)]
    pub argv: Vec<String>,
    /// Launch environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Spec file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_file: Option<PathBuf>,
    /// Interpreter path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_path: Option<PathBuf>,
    /// Metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Provenance
    #[serde(default)]
    pub registration: RegistrationInfo,
}

impl From<&KernelSpecRecord> for PersistedKernel {
    fn from(record: &KernelSpecRecord) -> Self {
        Self {
            id: record.id(),
            name: record.name().to_string(),
            display_name: record.display_name().to_string(),
            language: record.language().to_string(),
            argv: record.argv().to_vec(),
            env: record.env().clone(),
            spec_file: record.spec_file_path().map(PathBuf::from),
            interpreter_path: record.interpreter_path().map(PathBuf::from),
            metadata: record.metadata().clone(),
            registration: record.registration(),
        }
    }
}

impl From<PersistedKernel> for KernelSpecRecord {
    fn from(wire: PersistedKernel) -> Self {
        let mut record = KernelSpecRecord::new(wire.name, wire.display_name, wire.language, wire.argv)
            .with_env(wire.env)
            .with_metadata(wire.metadata)
            .with_registration(wire.registration);
        if let Some(spec_file) = wire.spec_file {
            record = record.with_spec_file(spec_file);
        }
        if let Some(interpreter) = wire.interpreter_path {
            record = record.with_interpreter_path(interpreter);
        }
        record
    }
}

/// Versioned blob stored under one persisted cache key
///
/// Kernels are kept as raw JSON so one undecodable entry does not poison
/// the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBlob {
    /// Serialized [`PersistedKernel`] entries
    #[serde(default)]
    pub kernels: Vec<Value>,
    /// Extension version that wrote the blob
    #[serde(default)]
    pub extension_version: String,
}
