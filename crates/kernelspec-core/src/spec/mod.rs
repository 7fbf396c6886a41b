//! Kernel spec data model
//!
//! - [`KernelSpecRecord`]: normalized, immutable record handed to callers
//! - [`KernelSpecFile`]: `kernel.json` as read from disk
//! - [`PersistedKernel`] / [`PersistedBlob`]: persisted cache wire form

mod record;
mod wire;

pub use record::{
    is_generated_kernel_name, KernelSpecRecord, PythonInterpreter, RegistrationInfo,
    EDITOR_METADATA_KEY, ORIGINAL_DISPLAY_NAME_KEY, ORIGINAL_SPEC_FILE_KEY,
};
pub use wire::{KernelSpecFile, PersistedBlob, PersistedKernel};
