//! Core domain types shared by every hop crate.
//!
//! Pure data and parsing only: semantic versions, release phases and their
//! on-disk filenames, patch identifiers, Git ref naming conventions, the
//! `.hop/` repository layout, and the repository configuration record.
//! Nothing in this crate touches Git or PostgreSQL.

pub mod config;
pub mod error;
pub mod patch;
pub mod paths;
pub mod refs;
pub mod release;
pub mod version;

pub use config::RepoConfig;
pub use error::{ProtocolError, Result};
pub use patch::{PatchId, PatchState};
pub use paths::HopPaths;
pub use refs::{LockScope, PROD_BRANCH};
pub use release::{ReleaseFile, ReleaseFileKind, ReleasePhase};
pub use version::{Level, Version};
