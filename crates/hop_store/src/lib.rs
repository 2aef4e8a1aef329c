//! On-disk state for hop: the mutable per-release manifest, immutable
//! promotion snapshots, patch directories and release-directory scanning.

pub mod error;
pub mod manifest;
pub mod patch_dir;
pub mod releases;
pub mod snapshot;
pub mod store;

pub use error::{Result, StoreError};
pub use manifest::Manifest;
pub use patch_dir::{is_bootstrap_file, PatchStore};
pub use releases::ReleaseIndex;
pub use store::ManifestStore;
