//! The repository value: working copy root, configuration, layout.

use crate::error::{PreconditionError, Result};
use hop_protocol::{HopPaths, RepoConfig, Version};
use std::path::Path;

/// A hop-managed working copy. Owned exclusively by the orchestrator; the
/// drivers borrow it for the duration of a single operation.
#[derive(Debug, Clone)]
pub struct Repo {
    paths: HopPaths,
    config: RepoConfig,
}

impl Repo {
    /// Open a repository: `.hop/config` must exist and name a remote.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let paths = HopPaths::new(root.as_ref());
        let config_path = paths.config_file();
        if !config_path.exists() {
            return Err(PreconditionError::Manifest(format!(
                "not a hop repository: {} missing",
                config_path.display()
            ))
            .into());
        }
        let config = RepoConfig::load(&config_path)?;
        if !config.has_remote() {
            return Err(PreconditionError::NoRemote.into());
        }
        Ok(Self { paths, config })
    }

    /// Assemble a repository value without touching disk (tests, init).
    pub fn with_config(root: impl AsRef<Path>, config: RepoConfig) -> Self {
        Self { paths: HopPaths::new(root.as_ref()), config }
    }

    pub fn paths(&self) -> &HopPaths {
        &self.paths
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RepoConfig {
        &mut self.config
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.paths.config_file())?;
        Ok(())
    }

    /// The current production version according to the `model/schema.sql`
    /// symlink; `0.0.0` when no release was ever promoted.
    pub fn production_version(&self) -> Version {
        self.paths
            .read_symlink_label()
            .and_then(|label| base_version_of(&label))
            .unwrap_or(Version::ZERO)
    }
}

/// `1.3.4` and `1.3.4-hotfix2` both have base version `1.3.4`.
fn base_version_of(label: &str) -> Option<Version> {
    let base = label.split('-').next()?;
    base.parse().ok()
}
