//! Repository layout under `.hop/` and the per-user home directory.

use std::path::{Path, PathBuf};

/// Resolve the hop home directory.
///
/// Priority:
/// 1) HOP_HOME
/// 2) the user's home directory
/// 3) ./.hop_home
pub fn hop_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HOP_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".hop");
    }
    PathBuf::from(".").join(".hop_home")
}

/// The fixed layout of a hop-managed repository.
///
/// ```text
/// <root>/
///   .hop/
///     config
///     releases/           X.Y.Z-patches.toml, X.Y.Z-rcN.txt, X.Y.Z.txt, ...
///     model/              schema.sql -> schema-X.Y.Z.sql, metadata-X.Y.Z.sql, ...
///     backups/            opaque snapshots, kept out of VCS
///   Patches/<id>/         patch artifacts, .sql/.py executable by extension
/// ```
#[derive(Debug, Clone)]
pub struct HopPaths {
    root: PathBuf,
}

impl HopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hop_dir(&self) -> PathBuf {
        self.root.join(".hop")
    }

    pub fn config_file(&self) -> PathBuf {
        self.hop_dir().join("config")
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.hop_dir().join("releases")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.hop_dir().join("model")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.hop_dir().join("backups")
    }

    /// Patch artifacts live at the repository root, outside `.hop/`.
    pub fn patches_dir(&self) -> PathBuf {
        self.root.join("Patches")
    }

    pub fn patch_dir(&self, id: &str) -> PathBuf {
        self.patches_dir().join(id)
    }

    /// `model/schema.sql`, a symlink to the active versioned schema.
    pub fn schema_symlink(&self) -> PathBuf {
        self.model_dir().join("schema.sql")
    }

    pub fn schema_file(&self, label: &str) -> PathBuf {
        self.model_dir().join(format!("schema-{label}.sql"))
    }

    pub fn metadata_file(&self, label: &str) -> PathBuf {
        self.model_dir().join(format!("metadata-{label}.sql"))
    }

    pub fn seed_file(&self, label: &str) -> PathBuf {
        self.model_dir().join(format!("seed-{label}.sql"))
    }

    pub fn release_file(&self, file_name: &str) -> PathBuf {
        self.releases_dir().join(file_name)
    }

    /// Parse the production version label out of the `schema.sql` symlink
    /// target (`schema-1.3.5.sql` -> `1.3.5`). Returns `None` when the
    /// symlink is missing or its target does not follow the convention.
    pub fn read_symlink_label(&self) -> Option<String> {
        let link = self.schema_symlink();
        let target = std::fs::read_link(&link).ok()?;
        let name = target.file_name()?.to_str()?;
        let label = name.strip_prefix("schema-")?.strip_suffix(".sql")?;
        if label.is_empty() {
            return None;
        }
        Some(label.to_string())
    }
}
