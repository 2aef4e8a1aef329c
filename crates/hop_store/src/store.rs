//! File-level operations on the `releases/` directory.

use crate::error::{Result, StoreError};
use crate::manifest::Manifest;
use crate::snapshot;
use hop_protocol::{PatchId, ReleaseFile, ReleaseFileKind, Version};
use std::path::PathBuf;
use tracing::debug;

/// Reads and writes the per-release manifest and snapshot files.
///
/// The on-disk manifest is the single source of truth for the order in
/// which staged patches are applied during promotion and deployment.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    releases_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(releases_dir: impl Into<PathBuf>) -> Self {
        Self { releases_dir: releases_dir.into() }
    }

    pub fn releases_dir(&self) -> &PathBuf {
        &self.releases_dir
    }

    pub fn path_of(&self, file: ReleaseFile) -> PathBuf {
        self.releases_dir.join(file.file_name())
    }

    /// Locate the development manifest for a version: the regular one, or
    /// the hotfix one for a reopened release.
    pub fn find_manifest(&self, version: Version) -> Option<ReleaseFile> {
        for kind in [ReleaseFileKind::Manifest, ReleaseFileKind::HotfixManifest] {
            let file = ReleaseFile::new(version, kind);
            if self.path_of(file).exists() {
                return Some(file);
            }
        }
        None
    }

    pub fn load(&self, version: Version) -> Result<Manifest> {
        let file = self
            .find_manifest(version)
            .ok_or(StoreError::MissingManifest(version))?;
        let path = self.path_of(file);
        let content = std::fs::read_to_string(&path)?;
        Manifest::parse(&content, &path)
    }

    pub fn save(&self, version: Version, manifest: &Manifest) -> Result<PathBuf> {
        let file = self
            .find_manifest(version)
            .ok_or(StoreError::MissingManifest(version))?;
        let path = self.path_of(file);
        std::fs::write(&path, manifest.render())?;
        Ok(path)
    }

    /// Create an empty manifest for a new release (or a reopened one).
    pub fn create_empty(&self, version: Version, hotfix: bool) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.releases_dir)?;
        let kind = if hotfix {
            ReleaseFileKind::HotfixManifest
        } else {
            ReleaseFileKind::Manifest
        };
        let path = self.path_of(ReleaseFile::new(version, kind));
        std::fs::write(&path, Manifest::new().render())?;
        debug!(path = %path.display(), "created empty manifest");
        Ok(path)
    }

    pub fn add_candidate(
        &self,
        version: Version,
        id: PatchId,
        before: Option<&PatchId>,
    ) -> Result<PathBuf> {
        let mut manifest = self.load(version)?;
        manifest.add_candidate(id, before)?;
        self.save(version, &manifest)
    }

    pub fn set_staged(&self, version: Version, id: &PatchId) -> Result<PathBuf> {
        let mut manifest = self.load(version)?;
        manifest.set_staged(id)?;
        self.save(version, &manifest)
    }

    pub fn remove(&self, version: Version, id: &PatchId) -> Result<PathBuf> {
        let mut manifest = self.load(version)?;
        manifest.remove(id)?;
        self.save(version, &manifest)
    }

    /// The ordered staged subset, used to build a promotion snapshot.
    pub fn to_snapshot(&self, version: Version) -> Result<Vec<PatchId>> {
        Ok(self.load(version)?.staged())
    }

    /// Write a promotion snapshot file and return its path.
    pub fn write_snapshot(&self, release: ReleaseFile, ids: &[PatchId]) -> Result<PathBuf> {
        let path = self.path_of(release);
        snapshot::write_snapshot(&path, release, ids)?;
        Ok(path)
    }

    /// Read a promotion snapshot.
    pub fn read_snapshot(&self, release: ReleaseFile) -> Result<Vec<PatchId>> {
        snapshot::read_snapshot(&self.path_of(release))
    }

    /// Move a release file in the working tree; promotion transitions are
    /// materialized this way (the caller stages both paths).
    pub fn rename(&self, src: ReleaseFile, dst: ReleaseFile) -> Result<(PathBuf, PathBuf)> {
        let from = self.path_of(src);
        let to = self.path_of(dst);
        std::fs::rename(&from, &to)?;
        Ok((from, to))
    }

    /// Delete a release file from the working tree.
    pub fn delete(&self, file: ReleaseFile) -> Result<PathBuf> {
        let path = self.path_of(file);
        std::fs::remove_file(&path)?;
        Ok(path)
    }
}
