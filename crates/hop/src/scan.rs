//! Cross-branch lookups: release branches on the remote and the manifests
//! committed on them.

use crate::error::Result;
use crate::repo::Repo;
use hop_git::GitDriver;
use hop_protocol::{refs, ReleaseFile, ReleaseFileKind, Version};
use hop_store::Manifest;
use std::path::{Path, PathBuf};

/// Versions with a `ho-release/*` branch on origin, ascending.
pub(crate) fn remote_release_versions(git: &GitDriver) -> Result<Vec<Version>> {
    let mut versions: Vec<Version> = git
        .list_remote_branches(Some("ho-release/"))?
        .iter()
        .filter_map(|b| refs::parse_release_branch(b))
        .collect();
    versions.sort();
    versions.dedup();
    Ok(versions)
}

/// The development manifest of a version as committed on its origin
/// release branch, without checking it out. `None` when the branch carries
/// no manifest.
pub(crate) fn manifest_on_release_branch(
    repo: &Repo,
    git: &GitDriver,
    version: Version,
) -> Result<Option<Manifest>> {
    let branch = format!("origin/{}", refs::release_branch(version));
    let releases_rel = relative_to_root(repo, &repo.paths().releases_dir());
    for kind in [ReleaseFileKind::Manifest, ReleaseFileKind::HotfixManifest] {
        let file = ReleaseFile::new(version, kind);
        let path = releases_rel.join(file.file_name());
        if let Some(content) = git.show(&branch, &path)? {
            return Ok(Some(Manifest::parse(&content, &path)?));
        }
    }
    Ok(None)
}

pub(crate) fn relative_to_root(repo: &Repo, path: &Path) -> PathBuf {
    path.strip_prefix(repo.paths().root()).unwrap_or(path).to_path_buf()
}
