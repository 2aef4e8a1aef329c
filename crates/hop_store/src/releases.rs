//! Scanning and classifying the `releases/` directory.

use crate::error::Result;
use hop_protocol::{ReleaseFile, ReleaseFileKind, Version};
use std::path::Path;

/// A point-in-time view of the release files on disk.
///
/// Foreign filenames are skipped on scan; snapshot and manifest files are
/// classified by name only (contents are read lazily by the store).
#[derive(Debug, Clone, Default)]
pub struct ReleaseIndex {
    files: Vec<ReleaseFile>,
}

impl ReleaseIndex {
    pub fn scan(releases_dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        if releases_dir.is_dir() {
            for entry in std::fs::read_dir(releases_dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Ok(file) = ReleaseFile::parse(name) {
                    files.push(file);
                }
            }
        }
        files.sort_by_key(|f| (f.version, sort_rank(f.kind)));
        Ok(Self { files })
    }

    pub fn files(&self) -> &[ReleaseFile] {
        &self.files
    }

    /// All versions with any release file, ascending and deduplicated.
    pub fn known_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.files.iter().map(|f| f.version).collect();
        versions.sort();
        versions.dedup();
        versions
    }

    pub fn productions(&self) -> Vec<Version> {
        self.files
            .iter()
            .filter(|f| f.kind == ReleaseFileKind::Production)
            .map(|f| f.version)
            .collect()
    }

    pub fn is_production(&self, version: Version) -> bool {
        self.productions().contains(&version)
    }

    pub fn latest_production(&self) -> Option<Version> {
        self.productions().into_iter().max()
    }

    /// Versions with a mutable manifest, ascending, with the hotfix flag.
    pub fn development_versions(&self) -> Vec<(Version, bool)> {
        self.files
            .iter()
            .filter_map(|f| match f.kind {
                ReleaseFileKind::Manifest => Some((f.version, false)),
                ReleaseFileKind::HotfixManifest => Some((f.version, true)),
                _ => None,
            })
            .collect()
    }

    pub fn candidate_numbers(&self, version: Version) -> Vec<u32> {
        let mut ns: Vec<u32> = self
            .files
            .iter()
            .filter_map(|f| match f.kind {
                ReleaseFileKind::Candidate(n) if f.version == version => Some(n),
                _ => None,
            })
            .collect();
        ns.sort_unstable();
        ns
    }

    pub fn hotfix_numbers(&self, version: Version) -> Vec<u32> {
        let mut ns: Vec<u32> = self
            .files
            .iter()
            .filter_map(|f| match f.kind {
                ReleaseFileKind::Hotfix(n) if f.version == version => Some(n),
                _ => None,
            })
            .collect();
        ns.sort_unstable();
        ns
    }

    /// The version with RC snapshots but no production snapshot yet — the
    /// single RC a repository may have in flight — with its highest RC
    /// number.
    pub fn active_rc(&self) -> Option<(Version, u32)> {
        self.files
            .iter()
            .filter_map(|f| match f.kind {
                ReleaseFileKind::Candidate(_) if !self.is_production(f.version) => {
                    Some(f.version)
                }
                _ => None,
            })
            .min()
            .map(|v| (v, *self.candidate_numbers(v).last().unwrap_or(&0)))
    }

    pub fn next_rc_number(&self, version: Version) -> u32 {
        self.candidate_numbers(version).last().copied().unwrap_or(0) + 1
    }

    pub fn next_hotfix_number(&self, version: Version) -> u32 {
        self.hotfix_numbers(version).last().copied().unwrap_or(0) + 1
    }

    /// The closest known version strictly below `version`, used by the
    /// sequential-promotion check.
    pub fn predecessor_of(&self, version: Version) -> Option<Version> {
        self.known_versions().into_iter().filter(|v| *v < version).max()
    }
}

fn sort_rank(kind: ReleaseFileKind) -> u8 {
    match kind {
        ReleaseFileKind::Manifest | ReleaseFileKind::HotfixManifest => 0,
        ReleaseFileKind::Candidate(_) => 1,
        ReleaseFileKind::Production => 2,
        ReleaseFileKind::Hotfix(_) => 3,
    }
}
