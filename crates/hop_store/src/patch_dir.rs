//! The on-disk patch directories `Patches/<id>/`.
//!
//! A patch is an unordered set of files; the executable subset are those
//! with a `.sql` or `.py` extension, applied in strict lexicographic
//! filename order. Everything else (README, data files) is ignored by the
//! applier.

use crate::error::{Result, StoreError};
use hop_protocol::PatchId;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const EXECUTABLE_EXTENSIONS: [&str; 2] = ["sql", "py"];

/// Manages the `Patches/` tree at the repository root.
#[derive(Debug, Clone)]
pub struct PatchStore {
    patches_dir: PathBuf,
}

impl PatchStore {
    pub fn new(patches_dir: impl Into<PathBuf>) -> Self {
        Self { patches_dir: patches_dir.into() }
    }

    pub fn dir_of(&self, id: &PatchId) -> PathBuf {
        self.patches_dir.join(id.as_str())
    }

    pub fn exists(&self, id: &PatchId) -> bool {
        self.dir_of(id).is_dir()
    }

    /// Create `Patches/<id>/` with a minimal README describing the patch.
    pub fn create(&self, id: &PatchId) -> Result<PathBuf> {
        if self.exists(id) {
            return Err(StoreError::PatchExists(id.clone()));
        }
        let dir = self.dir_of(id);
        std::fs::create_dir_all(&dir)?;
        let title = id.description().unwrap_or("schema patch");
        std::fs::write(
            dir.join("README.md"),
            format!(
                "# Patch {id}\n\n{title}\n\nFiles with a `.sql` or `.py` extension are applied in\nlexicographic order; everything else is ignored.\n"
            ),
        )?;
        debug!(dir = %dir.display(), "created patch directory");
        Ok(dir)
    }

    /// Remove a patch directory (rollback of a failed creation).
    pub fn remove(&self, id: &PatchId) -> Result<()> {
        if self.exists(id) {
            std::fs::remove_dir_all(self.dir_of(id))?;
        }
        Ok(())
    }

    /// The executable files of a patch, lexicographically sorted.
    pub fn executable_files(&self, id: &PatchId) -> Result<Vec<PathBuf>> {
        let dir = self.dir_of(id);
        if !dir.is_dir() {
            return Err(StoreError::PatchMissing(id.clone()));
        }
        let files: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| EXECUTABLE_EXTENSIONS.contains(&e))
            })
            .collect();
        Ok(files)
    }

    /// Structural validation: the directory must exist and contain at least
    /// one executable file.
    pub fn validate(&self, id: &PatchId) -> Result<()> {
        let files = self.executable_files(id)?;
        if files.is_empty() {
            return Err(StoreError::NoExecutableFiles(id.clone()));
        }
        Ok(())
    }

    /// Every patch directory name, unordered.
    pub fn list(&self) -> Result<Vec<PatchId>> {
        if !self.patches_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.patches_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = PatchId::parse(name) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

/// Whether a file carries the bootstrap marker on its first line
/// (`-- @hop:bootstrap` / `# @hop:bootstrap`). Bootstrap files seed data on
/// fresh deployments and are skipped during release replay.
pub fn is_bootstrap_file(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else { return false };
    let mut first_line = String::new();
    if BufReader::new(file).read_line(&mut first_line).is_err() {
        return false;
    }
    let line = first_line.trim().to_ascii_lowercase();
    let marker = line
        .strip_prefix("--")
        .or_else(|| line.strip_prefix('#'))
        .map(str::trim);
    matches!(marker, Some(m) if m == "@hop:bootstrap" || m == "@hop:data")
}
