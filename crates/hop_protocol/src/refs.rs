//! Git ref naming conventions: branches, reservation tags, lock tags and
//! promotion markers.

use crate::patch::PatchId;
use crate::version::Version;
use std::fmt;

/// The permanent trunk branch.
pub const PROD_BRANCH: &str = "ho-prod";

const RELEASE_PREFIX: &str = "ho-release/";
const PATCH_PREFIX: &str = "ho-patch/";
const VALIDATE_PREFIX: &str = "ho-validate/";
const RESERVATION_PREFIX: &str = "patch-id/";
const LOCK_PREFIX: &str = "lock-";

/// `ho-release/X.Y.Z`
pub fn release_branch(version: Version) -> String {
    format!("{RELEASE_PREFIX}{version}")
}

/// `ho-patch/<id>`
pub fn patch_branch(id: &PatchId) -> String {
    format!("{PATCH_PREFIX}{id}")
}

/// `ho-validate/<id>` (ephemeral, one merge attempt)
pub fn validate_branch(id: &PatchId) -> String {
    format!("{VALIDATE_PREFIX}{id}")
}

pub fn parse_release_branch(name: &str) -> Option<Version> {
    name.strip_prefix(RELEASE_PREFIX)?.parse().ok()
}

pub fn parse_patch_branch(name: &str) -> Option<PatchId> {
    PatchId::parse(name.strip_prefix(PATCH_PREFIX)?).ok()
}

pub fn parse_validate_branch(name: &str) -> Option<PatchId> {
    PatchId::parse(name.strip_prefix(VALIDATE_PREFIX)?).ok()
}

/// `patch-id/<id>` — permanent global reservation of a patch identifier.
pub fn reservation_tag(id: &PatchId) -> String {
    format!("{RESERVATION_PREFIX}{id}")
}

pub fn parse_reservation_tag(name: &str) -> Option<PatchId> {
    PatchId::parse(name.strip_prefix(RESERVATION_PREFIX)?).ok()
}

/// `release-X.Y.Z` — production promotion marker.
pub fn release_tag(version: Version) -> String {
    format!("release-{version}")
}

/// `release-rc-X.Y.Z-N` — RC promotion marker.
pub fn rc_tag(version: Version, n: u32) -> String {
    format!("release-rc-{version}-{n}")
}

/// `release-X.Y.Z-hotfixN` — hotfix promotion marker.
pub fn hotfix_tag(version: Version, n: u32) -> String {
    format!("release-{version}-hotfix{n}")
}

/// What a mutual-exclusion lock protects.
///
/// The scope fragment never contains `/`: a release scope is flattened to
/// `ho-release-X.Y.Z` so it stays a single tag path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Prod,
    Release(Version),
}

impl LockScope {
    pub fn fragment(&self) -> String {
        match self {
            LockScope::Prod => PROD_BRANCH.to_string(),
            LockScope::Release(v) => format!("ho-release-{v}"),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fragment())
    }
}

/// `lock-<scope>-<unix-ms>`
pub fn lock_tag(scope: LockScope, unix_ms: i64) -> String {
    format!("{LOCK_PREFIX}{}-{unix_ms}", scope.fragment())
}

/// Glob pattern matching every lock tag for a scope.
pub fn lock_tag_pattern(scope: LockScope) -> String {
    format!("{LOCK_PREFIX}{}-*", scope.fragment())
}

/// Extract the embedded millisecond timestamp from a lock tag name.
pub fn parse_lock_tag_timestamp(tag: &str) -> Option<i64> {
    if !tag.starts_with(LOCK_PREFIX) {
        return None;
    }
    let (_, ts) = tag.rsplit_once('-')?;
    if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    ts.parse().ok()
}
