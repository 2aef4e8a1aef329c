//! Error types for on-disk state.

use hop_protocol::{PatchId, Version};
use std::path::PathBuf;
use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures around manifests, snapshots and patch directories.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no development manifest for version {0}")]
    MissingManifest(Version),

    #[error("patch '{0}' already present in manifest")]
    DuplicatePatch(PatchId),

    #[error("patch '{0}' not present in manifest")]
    UnknownPatch(PatchId),

    #[error("patch '{0}' is already staged")]
    AlreadyStaged(PatchId),

    #[error("anchor patch '{0}' not present in manifest")]
    UnknownAnchor(PatchId),

    #[error("malformed manifest {path}: {detail}")]
    InvalidManifest { path: PathBuf, detail: String },

    #[error("malformed snapshot {path}: {detail}")]
    InvalidSnapshot { path: PathBuf, detail: String },

    #[error("patch directory already exists: {0}")]
    PatchExists(PatchId),

    #[error("patch directory missing: {0}")]
    PatchMissing(PatchId),

    #[error("patch '{0}' has no executable files (.sql or .py)")]
    NoExecutableFiles(PatchId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
