//! Immutable promotion snapshots: one patch id per line.
//!
//! Readers tolerate `#` comments and blank lines; writers emit a single
//! header comment naming the release.

use crate::error::{Result, StoreError};
use hop_protocol::{PatchId, ReleaseFile};
use std::path::Path;

/// Read an RC/production/hotfix snapshot file.
pub fn read_snapshot(path: &Path) -> Result<Vec<PatchId>> {
    let content = std::fs::read_to_string(path)?;
    let mut ids = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let id = PatchId::parse(line).map_err(|e| StoreError::InvalidSnapshot {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Render a snapshot document for a release file.
pub fn render_snapshot(release: ReleaseFile, ids: &[PatchId]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Release {}\n", release.release_label()));
    for id in ids {
        out.push_str(id.as_str());
        out.push('\n');
    }
    out
}

/// Write a snapshot file; the parent directory must exist.
pub fn write_snapshot(path: &Path, release: ReleaseFile, ids: &[PatchId]) -> Result<()> {
    std::fs::write(path, render_snapshot(release, ids))?;
    Ok(())
}
