//! Applying promoted releases to a target database.

use crate::collab::{BackupStore, Database};
use crate::error::{Error, PreconditionError, Result, ValidationError};
use crate::repo::Repo;
use crate::report::OperationReport;
use hop_protocol::{ReleaseFile, ReleaseFileKind, Version};
use hop_store::{is_bootstrap_file, ManifestStore, PatchStore, ReleaseIndex};
use tracing::{info, warn};

pub struct Deployer<'a> {
    repo: &'a Repo,
    db: &'a dyn Database,
    backups: &'a dyn BackupStore,
}

impl<'a> Deployer<'a> {
    pub fn new(repo: &'a Repo, db: &'a dyn Database, backups: &'a dyn BackupStore) -> Self {
        Self { repo, db, backups }
    }

    /// Bring the attached database to `target`.
    ///
    /// From a fresh database the versioned artifacts are loaded directly;
    /// otherwise every production snapshot above the current version (and
    /// the hotfix snapshots chained to it) is applied in order, each behind
    /// a backup. Any error aborts the run; the most recent backup is kept.
    pub fn deploy(&self, target: Version) -> Result<OperationReport> {
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        if !index.is_production(target) {
            return Err(PreconditionError::UnknownVersion(target).into());
        }

        let current = self.db.read_current_version()?;
        let mut report = OperationReport::new("deploy").identifier(target.to_string());

        let Some(current) = current else {
            self.deploy_fresh(target)?;
            report.status = format!("fresh deployment of {target}");
            return Ok(report);
        };

        if current >= target {
            report.status = format!("database already at {current}; nothing to do");
            return Ok(report);
        }

        for release in self.snapshot_chain(&index, current, target) {
            self.apply_snapshot(release, &mut report)?;
        }
        info!(%target, "deployment complete");
        Ok(report)
    }

    /// Production snapshots in `(current, target]`, each followed by its
    /// hotfix snapshots, ascending.
    fn snapshot_chain(
        &self,
        index: &ReleaseIndex,
        current: Version,
        target: Version,
    ) -> Vec<ReleaseFile> {
        let mut chain = Vec::new();
        for version in index.productions() {
            if version <= current || version > target {
                continue;
            }
            chain.push(ReleaseFile::new(version, ReleaseFileKind::Production));
            for n in index.hotfix_numbers(version) {
                chain.push(ReleaseFile::new(version, ReleaseFileKind::Hotfix(n)));
            }
        }
        chain
    }

    fn apply_snapshot(&self, release: ReleaseFile, report: &mut OperationReport) -> Result<()> {
        let store = ManifestStore::new(self.repo.paths().releases_dir());
        let patches = PatchStore::new(self.repo.paths().patches_dir());
        let ids = store.read_snapshot(release)?;
        let label = release.release_label();

        // An empty snapshot is a version bump only; no backup churn.
        if !ids.is_empty() {
            match self.backups.dump(self.db, &label) {
                Ok(path) => info!(backup = %path.display(), %label, "backup taken"),
                Err(e) => {
                    return Err(Error::internal(format!("backup before {label} failed: {e}")));
                }
            }
        }

        let root = self.repo.paths().root().to_path_buf();
        for id in &ids {
            for file in patches.executable_files(id)? {
                if is_bootstrap_file(&file) {
                    continue;
                }
                let is_sql = file.extension().and_then(|e| e.to_str()) == Some("sql");
                let outcome = if is_sql {
                    self.db.apply_sql_file(&file)
                } else {
                    self.db.apply_script(&file, &root)
                };
                outcome.map_err(|e| ValidationError::ApplyFailed {
                    patch: id.clone(),
                    file: file.clone(),
                    stage: if is_sql { "sql" } else { "script" },
                    detail: e.to_string(),
                })?;
            }
        }
        self.db.write_release_row(release.version, release.kind.phase())?;
        report.identifiers.push(label);
        Ok(())
    }

    /// Fast path for an empty database: load the versioned artifacts
    /// directly instead of replaying history.
    fn deploy_fresh(&self, target: Version) -> Result<()> {
        let label = target.to_string();
        let paths = self.repo.paths();
        let schema = paths.schema_file(&label);
        if !schema.is_file() {
            return Err(PreconditionError::MissingSchema(schema).into());
        }
        self.db.apply_sql_file(&schema)?;

        let metadata = paths.metadata_file(&label);
        if metadata.is_file() {
            self.db.apply_sql_file(&metadata)?;
        } else {
            warn!(%label, "no metadata artifact; writing the release row directly");
            self.db
                .write_release_row(target, hop_protocol::ReleasePhase::Production)?;
        }
        let seed = paths.seed_file(&label);
        if seed.is_file() {
            self.db.apply_sql_file(&seed)?;
        }
        info!(%target, "fresh database loaded from artifacts");
        Ok(())
    }
}
