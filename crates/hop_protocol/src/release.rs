//! Release phases and their on-disk filenames under `releases/`.

use crate::error::{ProtocolError, Result};
use crate::version::Version;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static RELEASE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)\.(\d+)\.(\d+)(?:-(patches|hotfix-patches|rc(\d+)|hotfix(\d+)))?\.(toml|txt)$",
    )
    .expect("release filename regex")
});

/// The lifecycle phase of a release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleasePhase {
    /// Mutable manifest, patches being integrated.
    Development,
    /// Immutable release-candidate snapshot N.
    Candidate(u32),
    /// Immutable production snapshot.
    Production,
    /// Immutable hotfix snapshot N.
    Hotfix(u32),
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleasePhase::Development => write!(f, "development"),
            ReleasePhase::Candidate(n) => write!(f, "rc{n}"),
            ReleasePhase::Production => write!(f, "production"),
            ReleasePhase::Hotfix(n) => write!(f, "hotfix{n}"),
        }
    }
}

/// What kind of file a `releases/` directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFileKind {
    /// `X.Y.Z-patches.toml` — mutable development manifest.
    Manifest,
    /// `X.Y.Z-hotfix-patches.toml` — mutable manifest for a reopened release.
    HotfixManifest,
    /// `X.Y.Z-rcN.txt` — immutable RC snapshot.
    Candidate(u32),
    /// `X.Y.Z.txt` — immutable production snapshot.
    Production,
    /// `X.Y.Z-hotfixN.txt` — immutable hotfix snapshot.
    Hotfix(u32),
}

impl ReleaseFileKind {
    /// Whether this file is a mutable manifest (development phase).
    pub fn is_manifest(&self) -> bool {
        matches!(self, ReleaseFileKind::Manifest | ReleaseFileKind::HotfixManifest)
    }

    pub fn phase(&self) -> ReleasePhase {
        match self {
            ReleaseFileKind::Manifest | ReleaseFileKind::HotfixManifest => {
                ReleasePhase::Development
            }
            ReleaseFileKind::Candidate(n) => ReleasePhase::Candidate(*n),
            ReleaseFileKind::Production => ReleasePhase::Production,
            ReleaseFileKind::Hotfix(n) => ReleasePhase::Hotfix(*n),
        }
    }
}

/// A classified entry of the `releases/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFile {
    pub version: Version,
    pub kind: ReleaseFileKind,
}

impl ReleaseFile {
    pub fn new(version: Version, kind: ReleaseFileKind) -> Self {
        Self { version, kind }
    }

    /// Classify a `releases/` filename. Returns an error for names that do
    /// not belong to the release family; scanners skip those.
    pub fn parse(filename: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidReleaseFile(filename.to_string());
        let caps = RELEASE_FILE_RE.captures(filename).ok_or_else(invalid)?;
        let num = |m: &str| m.parse::<u32>().map_err(|_| invalid());
        let version = Version::new(num(&caps[1])?, num(&caps[2])?, num(&caps[3])?);
        let ext = &caps[7];
        let kind = match caps.get(4).map(|m| m.as_str()) {
            None => ReleaseFileKind::Production,
            Some("patches") => ReleaseFileKind::Manifest,
            Some("hotfix-patches") => ReleaseFileKind::HotfixManifest,
            Some(_) => {
                if let Some(rc) = caps.get(5) {
                    ReleaseFileKind::Candidate(num(rc.as_str())?)
                } else if let Some(hf) = caps.get(6) {
                    ReleaseFileKind::Hotfix(num(hf.as_str())?)
                } else {
                    return Err(invalid());
                }
            }
        };
        // Manifests are .toml, snapshots are .txt.
        let ext_ok = match kind {
            ReleaseFileKind::Manifest | ReleaseFileKind::HotfixManifest => ext == "toml",
            _ => ext == "txt",
        };
        if !ext_ok {
            return Err(ProtocolError::InvalidReleaseFile(filename.to_string()));
        }
        Ok(ReleaseFile { version, kind })
    }

    /// The canonical filename for this entry.
    pub fn file_name(&self) -> String {
        let v = self.version;
        match self.kind {
            ReleaseFileKind::Manifest => format!("{v}-patches.toml"),
            ReleaseFileKind::HotfixManifest => format!("{v}-hotfix-patches.toml"),
            ReleaseFileKind::Candidate(n) => format!("{v}-rc{n}.txt"),
            ReleaseFileKind::Production => format!("{v}.txt"),
            ReleaseFileKind::Hotfix(n) => format!("{v}-hotfix{n}.txt"),
        }
    }

    /// The label used for versioned model artifacts (`schema-<label>.sql`).
    pub fn artifact_label(&self) -> String {
        let v = self.version;
        match self.kind {
            ReleaseFileKind::Hotfix(n) => format!("{v}-hotfix{n}"),
            _ => v.to_string(),
        }
    }

    /// The human-facing release label (`X.Y.Z`, `X.Y.Z-rcN`, `X.Y.Z-hotfixN`).
    pub fn release_label(&self) -> String {
        let v = self.version;
        match self.kind {
            ReleaseFileKind::Candidate(n) => format!("{v}-rc{n}"),
            ReleaseFileKind::Hotfix(n) => format!("{v}-hotfix{n}"),
            _ => v.to_string(),
        }
    }
}
