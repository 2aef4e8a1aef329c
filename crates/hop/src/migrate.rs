//! Repository-layout migrations between tool versions.
//!
//! Migrations are ordered by tool version, idempotent, and guarded: one
//! runs only when the repository's recorded tool version is strictly lower
//! than the migration's target.

use crate::error::{Error, Result};
use crate::repo::Repo;
use hop_git::GitDriver;
use hop_protocol::Version;
use std::path::Path;
use tracing::info;

/// What a single migration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated,
    AlreadyApplied,
}

struct MigrationDef {
    target: Version,
    summary: &'static str,
    run: fn(&Repo, &GitDriver) -> Result<MigrationOutcome>,
}

fn registry() -> Vec<MigrationDef> {
    vec![MigrationDef {
        target: Version::new(0, 17, 1),
        summary: "relocate repository layout under .hop/",
        run: relocate_layout_under_hop,
    }]
}

pub struct Migrator<'a> {
    repo: &'a mut Repo,
    git: &'a GitDriver,
}

impl<'a> Migrator<'a> {
    pub fn new(repo: &'a mut Repo, git: &'a GitDriver) -> Self {
        Self { repo, git }
    }

    /// Run every migration whose target version is above the recorded tool
    /// version, in order. Each applied migration commits its own changes
    /// and bumps the recorded version.
    pub fn run_pending(&mut self) -> Result<Vec<(Version, MigrationOutcome)>> {
        let recorded: Version = self
            .repo
            .config()
            .hop_version
            .parse()
            .unwrap_or(Version::ZERO);
        let mut outcomes = Vec::new();
        for migration in registry() {
            if recorded >= migration.target {
                continue;
            }
            let outcome = (migration.run)(self.repo, self.git)?;
            self.repo.config_mut().hop_version = migration.target.to_string();
            self.repo.save_config()?;
            let config_rel = Path::new(".hop").join("config");
            self.git.add(&[&config_rel])?;
            if outcome == MigrationOutcome::Migrated {
                self.git.commit_staged(&format!(
                    "[migrate {}] {}",
                    migration.target, migration.summary
                ))?;
                info!(target = %migration.target, "migration applied");
            } else {
                // Nothing moved; record the version bump alone.
                self.git.commit_staged(&format!(
                    "[migrate {}] record tool version",
                    migration.target
                ))?;
            }
            outcomes.push((migration.target, outcome));
        }
        Ok(outcomes)
    }
}

/// v0.17.1: `releases/` and `model/` move from the repository root into
/// `.hop/`, and `.hop/backups/` joins `.gitignore`.
fn relocate_layout_under_hop(repo: &Repo, git: &GitDriver) -> Result<MigrationOutcome> {
    let root = repo.paths().root();
    let hop_dir = repo.paths().hop_dir();
    std::fs::create_dir_all(&hop_dir).map_err(|e| Error::internal(e.to_string()))?;

    let mut moved = false;
    for dir in ["releases", "model"] {
        let old = root.join(dir);
        let new = hop_dir.join(dir);
        if old.is_dir() && !new.exists() {
            git.mv(Path::new(dir), &Path::new(".hop").join(dir))?;
            moved = true;
        }
    }

    // .gitignore gains the backups directory exactly once.
    let gitignore = root.join(".gitignore");
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
    if !existing.lines().any(|l| l.trim() == ".hop/backups/") {
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(".hop/backups/\n");
        std::fs::write(&gitignore, content).map_err(|e| Error::internal(e.to_string()))?;
        git.add(&[Path::new(".gitignore")])?;
        moved = true;
    }

    if moved {
        Ok(MigrationOutcome::Migrated)
    } else {
        Ok(MigrationOutcome::AlreadyApplied)
    }
}
