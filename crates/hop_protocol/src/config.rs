//! The `.hop/config` record.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Repository configuration stored in `.hop/config`.
///
/// The tool operates only when `git_origin` is set; everything else has a
/// usable default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Package name of the managed project.
    pub package_name: String,

    /// Version of the tool that last wrote this repository layout.
    #[serde(default)]
    pub hop_version: String,

    /// URL of the Git remote used for coordination.
    #[serde(default)]
    pub git_origin: String,

    /// Whether this checkout participates in development (patch/release
    /// work) or is a sync-only deployment checkout.
    #[serde(default)]
    pub devel: bool,
}

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    hop: RepoConfig,
}

impl RepoConfig {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            hop_version: String::new(),
            git_origin: String::new(),
            devel: false,
        }
    }

    /// Whether a coordination remote is configured.
    pub fn has_remote(&self) -> bool {
        !self.git_origin.trim().is_empty()
    }

    /// Load the configuration from a `.hop/config` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile =
            toml::from_str(&content).map_err(|e| ProtocolError::Config(e.to_string()))?;
        Ok(file.hop)
    }

    /// Save the configuration to a `.hop/config` file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ConfigFile { hop: self.clone() };
        let content =
            toml::to_string_pretty(&file).map_err(|e| ProtocolError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        let mut config = RepoConfig::new("blog");
        config.hop_version = "0.17.1".to_string();
        config.git_origin = "git@example.com:acme/blog.git".to_string();
        config.devel = true;
        config.save(&path).unwrap();

        let loaded = RepoConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.has_remote());
    }

    #[test]
    fn missing_fields_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, "[hop]\npackage_name = \"blog\"\n").unwrap();
        let loaded = RepoConfig::load(&path).unwrap();
        assert_eq!(loaded.package_name, "blog");
        assert!(!loaded.devel);
        assert!(!loaded.has_remote());
    }

    #[test]
    fn rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, "not toml at all [").unwrap();
        assert!(RepoConfig::load(&path).is_err());
    }
}
