//! Explicit base-directory context for local file sources and sinks.

use std::path::{Path, PathBuf};

use objxfer_transfer::{TransferError, validate_relative_path};

/// Base directory that relative local paths are resolved against.
///
/// Capture it once at process entry and pass it to whatever needs it; the
/// engine never reads the process working directory on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferContext {
    base_dir: PathBuf,
}

impl TransferContext {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Captures the current working directory.
    pub fn capture() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves `relative` under the base directory.
    ///
    /// Empty, absolute and parent-traversing paths are rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, TransferError> {
        validate_relative_path(relative)?;
        Ok(self.base_dir.join(relative))
    }
}
