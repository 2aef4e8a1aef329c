//! The release lifecycle: creation, RC and production promotion, hotfix
//! re-entry.
//!
//! Promotions run under the trunk lock and enforce two invariants:
//! sequential promotion (the next promotable version is the immediate
//! semver successor of production) and a single active RC at a time.

use crate::collab::Database;
use crate::error::{
    CoordinationError, Error, InvariantError, PreconditionError, Result,
};
use crate::repo::Repo;
use crate::scan;
use crate::report::OperationReport;
use hop_git::{GitDriver, LockService, PushOutcome, SyncState};
use hop_protocol::refs;
use hop_protocol::{
    Level, LockScope, PatchId, ReleaseFile, ReleaseFileKind, Version, PROD_BRANCH,
};
use hop_store::{is_bootstrap_file, Manifest, ManifestStore, PatchStore, ReleaseIndex};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ReleaseLifecycle<'a> {
    repo: &'a Repo,
    git: &'a GitDriver,
    db: &'a dyn Database,
    seed_tables: &'a [String],
}

impl<'a> ReleaseLifecycle<'a> {
    pub fn new(
        repo: &'a Repo,
        git: &'a GitDriver,
        db: &'a dyn Database,
        seed_tables: &'a [String],
    ) -> Self {
        Self { repo, git, db, seed_tables }
    }

    fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(self.repo.paths().releases_dir())
    }

    fn patch_store(&self) -> PatchStore {
        PatchStore::new(self.repo.paths().patches_dir())
    }

    fn require_on_prod_clean_synced(&self) -> Result<()> {
        let branch = self.git.current_branch()?;
        if branch != PROD_BRANCH {
            return Err(PreconditionError::WrongBranch {
                expected: PROD_BRANCH.to_string(),
                actual: branch,
            }
            .into());
        }
        if !self.git.is_clean()? {
            return Err(PreconditionError::DirtyWorktree.into());
        }
        self.git.fetch()?;
        match self.git.is_synced_with(PROD_BRANCH)? {
            SyncState::Synced | SyncState::Ahead => Ok(()),
            SyncState::Behind => {
                self.git.pull_ff(PROD_BRANCH)?;
                Ok(())
            }
            SyncState::Diverged => Err(CoordinationError::Diverged {
                branch: PROD_BRANCH.to_string(),
            }
            .into()),
        }
    }

    /// Versions with a release branch on the remote, ascending.
    fn release_branch_versions(&self) -> Result<Vec<Version>> {
        scan::remote_release_versions(self.git)
    }

    /// Load the development manifest of a version as committed on its
    /// release branch (without checking it out).
    fn manifest_on_release_branch(&self, version: Version) -> Result<Option<Manifest>> {
        scan::manifest_on_release_branch(self.repo, self.git, version)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        scan::relative_to_root(self.repo, path)
    }

    fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        let rels: Vec<PathBuf> = paths.iter().map(|p| self.relative(p)).collect();
        let refs: Vec<&Path> = rels.iter().map(|p| p.as_path()).collect();
        self.git.commit(&refs, message)?;
        Ok(())
    }

    // ---- create ----------------------------------------------------------

    /// Open a new release: `ho-release/<next>` with an empty manifest.
    pub fn create_release(&self, level: Level) -> Result<OperationReport> {
        self.require_on_prod_clean_synced()?;

        let current = self.repo.production_version();
        let next = current.next(level);
        let release_branch = refs::release_branch(next);

        if self.git.branch_exists(&release_branch)?
            || self.git.remote_branch_exists(&release_branch)?
        {
            return Err(PreconditionError::ReleaseExists(next).into());
        }
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        if index.known_versions().contains(&next) {
            return Err(PreconditionError::ReleaseExists(next).into());
        }

        // Manifest lands on the trunk first so every later branch sees it,
        // then the release branch starts from that commit.
        let manifest_path = self.manifest_store().create_empty(next, false)?;
        self.commit_paths(&[manifest_path], &format!("Prepare release {next}"))?;
        self.git.push()?;
        self.git.checkout_new(&release_branch, PROD_BRANCH)?;
        self.git.push_branch(&release_branch, true)?;

        info!(version = %next, "release created");
        Ok(OperationReport::new("new_release")
            .identifier(next.to_string())
            .identifier(release_branch))
    }

    // ---- promote to RC ---------------------------------------------------

    /// Promote the eligible release's staged set to the next RC.
    pub fn promote_to_rc(&self) -> Result<OperationReport> {
        self.require_on_prod_clean_synced()?;
        let locks = LockService::new(self.git);
        let lock = locks.acquire(LockScope::Prod)?;
        let lock_tag = lock.tag().to_string();
        let result = self.promote_to_rc_locked();
        lock.release();
        let mut report = result?;
        report.lock_tag = Some(lock_tag);
        Ok(report)
    }

    fn promote_to_rc_locked(&self) -> Result<OperationReport> {
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;

        // Target detection: smallest development version with a non-empty
        // staged set, read from its release branch. An entirely empty
        // manifest is promotable once (a pure version-bump release); after
        // its first RC an empty manifest means "nothing new to promote".
        // Versions already in production are hotfix lines, not RC targets.
        let mut target: Option<(Version, Manifest)> = None;
        let dev_versions = self.release_branch_versions()?;
        for version in &dev_versions {
            if index.is_production(*version) {
                continue;
            }
            if let Some(manifest) = self.manifest_on_release_branch(*version)? {
                let fresh_empty =
                    manifest.is_empty() && index.candidate_numbers(*version).is_empty();
                if !manifest.staged().is_empty() || fresh_empty {
                    target = Some((*version, manifest));
                    break;
                }
            }
        }
        let (version, manifest) =
            target.ok_or(PreconditionError::NothingToPromote)?;

        // Single active RC.
        if let Some((rc_version, _)) = index.active_rc() {
            if rc_version != version {
                return Err(InvariantError::ActiveRCExists { version: rc_version }.into());
            }
        }
        self.check_sequential(&index, &dev_versions, version)?;

        let n = index.next_rc_number(version);
        let staged = manifest.staged();
        let release_branch = refs::release_branch(version);

        // Materialize the snapshot on the release branch.
        self.checkout_fresh(&release_branch)?;
        let store = self.manifest_store();
        let rc_file = ReleaseFile::new(version, ReleaseFileKind::Candidate(n));
        let snapshot_path = store.write_snapshot(rc_file, &staged)?;
        let mut manifest = store.load(version)?;
        manifest.clear_staged();
        let manifest_path = store.save(version, &manifest)?;
        self.commit_paths(
            &[snapshot_path, manifest_path],
            &format!("Snapshot release {version}-rc{n}"),
        )?;
        self.git.push()?;

        // Fold the code payload of the staged patches into the trunk so the
        // RC is testable from trunk checkouts.
        self.git.checkout(PROD_BRANCH)?;
        self.git.merge_no_ff(
            &release_branch,
            &format!("Merge {release_branch} into {PROD_BRANCH} (rc{n})"),
        )?;

        let tag = refs::rc_tag(version, n);
        self.git.create_tag(&tag, "HEAD", Some(&format!("Release candidate {version}-rc{n}")))?;
        if self.git.push_tag(&tag)? == PushOutcome::Rejected {
            return Err(CoordinationError::PushRejected(format!("tag {tag} already exists")).into());
        }

        let mut report = OperationReport::new("promote_rc")
            .identifier(version.to_string())
            .identifier(rc_file.file_name());
        report.tags_pushed.push(tag);

        // The staged patch branches served their purpose; provenance stays
        // on the permanent reservation tags.
        for staged_id in &staged {
            let branch = refs::patch_branch(staged_id);
            self.delete_branch_everywhere(&branch, &mut report);
        }

        self.notify_rebase_needed(&mut report)?;
        self.git.push()?;

        info!(%version, n, "release candidate promoted");
        Ok(report)
    }

    /// Sequential promotion: the predecessor of the target (closest known
    /// smaller version, including other development branches) must already
    /// be in production.
    fn check_sequential(
        &self,
        index: &ReleaseIndex,
        dev_versions: &[Version],
        target: Version,
    ) -> Result<()> {
        let mut known = index.known_versions();
        known.extend(dev_versions.iter().copied());
        known.sort();
        known.dedup();
        let predecessor = known.into_iter().filter(|v| *v < target).max();
        if let Some(pred) = predecessor {
            if !index.is_production(pred) {
                return Err(InvariantError::SequentialityViolated {
                    version: target,
                    must_first: pred,
                }
                .into());
            }
        }
        Ok(())
    }

    fn checkout_fresh(&self, branch: &str) -> Result<()> {
        if self.git.branch_exists(branch)? {
            match self.git.is_synced_with(branch)? {
                SyncState::Synced | SyncState::Ahead => {}
                SyncState::Behind => self.git.fast_forward_local(branch)?,
                SyncState::Diverged => {
                    return Err(CoordinationError::Diverged { branch: branch.to_string() }.into());
                }
            }
            self.git.checkout(branch)?;
        } else {
            self.git.create_branch(branch, &format!("origin/{branch}"))?;
            self.git.checkout(branch)?;
        }
        Ok(())
    }

    fn delete_branch_everywhere(&self, branch: &str, report: &mut OperationReport) {
        match self.git.branch_exists(branch) {
            Ok(true) => {
                if let Err(e) = self.git.delete_branch(branch, true) {
                    warn!(%branch, "local branch delete failed: {e}");
                } else {
                    report.branches_deleted.push(branch.to_string());
                }
            }
            Ok(false) => {}
            Err(e) => warn!(%branch, "branch check failed: {e}"),
        }
        match self.git.remote_branch_exists(branch) {
            Ok(true) => {
                if let Err(e) = self.git.delete_remote_branch(branch) {
                    warn!(%branch, "remote branch delete failed: {e}");
                } else {
                    report.branches_deleted.push(format!("origin/{branch}"));
                }
            }
            Ok(false) => {}
            Err(e) => warn!(%branch, "remote branch check failed: {e}"),
        }
    }

    /// Emit `[notify]` commits on surviving patch branches that descend
    /// from an older trunk commit, telling them to refresh.
    fn notify_rebase_needed(&self, report: &mut OperationReport) -> Result<()> {
        let prod_head = self.git.head_commit()?;
        for branch in self.git.list_remote_branches(Some("ho-patch/"))? {
            let remote_ref = format!("origin/{branch}");
            match self.git.is_ancestor(&prod_head, &remote_ref) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(%branch, "ancestry check failed: {e}");
                    continue;
                }
            }
            let headline = format!("[notify] promote_rc: {PROD_BRANCH} moved; {branch} must refresh");
            let message =
                format!("{headline}\n\nRun on {branch}:\ngit merge {PROD_BRANCH}");
            if let Err(e) = self.notify_branch(&branch, &message) {
                warn!(%branch, "rebase notification failed: {e}");
                continue;
            }
            report.notifications_emitted.push(headline);
        }
        self.git.checkout(PROD_BRANCH)?;
        Ok(())
    }

    fn notify_branch(&self, branch: &str, message: &str) -> Result<()> {
        self.checkout_fresh(branch)?;
        self.git.commit_empty(message)?;
        self.git.push()?;
        Ok(())
    }

    // ---- promote to production -------------------------------------------

    /// Promote the active RC to production.
    pub fn promote_to_prod(&self) -> Result<OperationReport> {
        self.require_on_prod_clean_synced()?;
        let locks = LockService::new(self.git);
        let lock = locks.acquire(LockScope::Prod)?;
        let lock_tag = lock.tag().to_string();
        let result = self.promote_to_prod_locked();
        lock.release();
        let mut report = result?;
        report.lock_tag = Some(lock_tag);
        Ok(report)
    }

    fn promote_to_prod_locked(&self) -> Result<OperationReport> {
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        let (version, rc_n) = index.active_rc().ok_or(PreconditionError::NothingToPromote)?;
        self.check_sequential(&index, &[], version)?;

        let store = self.manifest_store();
        let rc_file = ReleaseFile::new(version, ReleaseFileKind::Candidate(rc_n));
        let prod_file = ReleaseFile::new(version, ReleaseFileKind::Production);

        // Promotion transition: move the snapshot in the working tree and
        // retire the mutable manifest.
        let (old_path, new_path) = store.rename(rc_file, prod_file)?;
        let mut commit_files = vec![old_path, new_path];
        let manifest_file = ReleaseFile::new(version, ReleaseFileKind::Manifest);
        if store.path_of(manifest_file).exists() {
            commit_files.push(store.delete(manifest_file)?);
        }

        // Rebuild the production artifacts from a pristine replica.
        let ids = store.read_snapshot(prod_file)?;
        let label = prod_file.artifact_label();
        let artifacts = self.rebuild_artifacts(&ids, &label, version, prod_file)?;
        commit_files.extend(artifacts);
        commit_files.push(self.point_schema_symlink(&label)?);

        self.commit_paths(&commit_files, &format!("Release {version}"))?;

        let tag = refs::release_tag(version);
        self.git.create_tag(&tag, "HEAD", Some(&format!("Release {version}")))?;
        if self.git.push_tag(&tag)? == PushOutcome::Rejected {
            return Err(CoordinationError::PushRejected(format!("tag {tag} already exists")).into());
        }

        let mut report = OperationReport::new("promote_prod")
            .identifier(version.to_string())
            .identifier(prod_file.file_name());
        report.tags_pushed.push(tag);

        let release_branch = refs::release_branch(version);
        self.delete_branch_everywhere(&release_branch, &mut report);
        self.git.push()?;

        info!(%version, "release promoted to production");
        Ok(report)
    }

    /// Reset a pristine replica to the previous production schema, apply
    /// the snapshot's patches in order, record the release row, and dump
    /// the versioned artifacts.
    fn rebuild_artifacts(
        &self,
        ids: &[PatchId],
        label: &str,
        version: Version,
        release: ReleaseFile,
    ) -> Result<Vec<PathBuf>> {
        let schema = self.repo.paths().schema_symlink();
        if schema.exists() {
            self.db.reset_to_schema(&schema)?;
        }
        let patches = self.patch_store();
        let root = self.repo.paths().root().to_path_buf();
        for id in ids {
            for file in patches.executable_files(id)? {
                if is_bootstrap_file(&file) {
                    continue;
                }
                let is_sql = file.extension().and_then(|e| e.to_str()) == Some("sql");
                if is_sql {
                    self.db.apply_sql_file(&file)?;
                } else {
                    self.db.apply_script(&file, &root)?;
                }
            }
        }
        self.db.write_release_row(version, release.kind.phase())?;

        let model_dir = self.repo.paths().model_dir();
        std::fs::create_dir_all(&model_dir).map_err(|e| Error::internal(e.to_string()))?;
        let mut artifacts = vec![
            self.db.dump_schema(&model_dir, label)?,
            self.db.dump_metadata(&model_dir, label)?,
        ];
        if let Some(seed) = self.db.dump_seed(&model_dir, label, self.seed_tables)? {
            artifacts.push(seed);
        }
        Ok(artifacts)
    }

    /// Point `model/schema.sql` at the active versioned snapshot.
    fn point_schema_symlink(&self, label: &str) -> Result<PathBuf> {
        let link = self.repo.paths().schema_symlink();
        if link.exists() || link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link).map_err(|e| Error::internal(e.to_string()))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(format!("schema-{label}.sql"), &link)
            .map_err(|e| Error::internal(e.to_string()))?;
        #[cfg(not(unix))]
        std::fs::copy(self.repo.paths().schema_file(label), &link)
            .map(|_| ())
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(link)
    }

    // ---- hotfix ----------------------------------------------------------

    /// Reopen a production release for emergency patches.
    pub fn hotfix_open(&self, version: Version) -> Result<OperationReport> {
        self.require_on_prod_clean_synced()?;

        let tag = refs::release_tag(version);
        if !self.git.tag_exists(&tag)? {
            return Err(PreconditionError::NoSuchRelease(version).into());
        }
        let release_branch = refs::release_branch(version);
        if self.git.branch_exists(&release_branch)?
            || self.git.remote_branch_exists(&release_branch)?
        {
            return Err(PreconditionError::ReleaseExists(version).into());
        }

        self.git.checkout_new(&release_branch, &tag)?;
        let manifest_path = self.manifest_store().create_empty(version, true)?;
        self.commit_paths(&[manifest_path], &format!("Open hotfix line for {version}"))?;
        self.git.push_branch(&release_branch, true)?;

        info!(%version, "hotfix line opened");
        Ok(OperationReport::new("hotfix_open")
            .identifier(version.to_string())
            .identifier(release_branch))
    }

    /// Promote the staged hotfix patches of a reopened release.
    pub fn promote_to_hotfix(&self) -> Result<OperationReport> {
        self.require_on_prod_clean_synced()?;
        let locks = LockService::new(self.git);
        let lock = locks.acquire(LockScope::Prod)?;
        let lock_tag = lock.tag().to_string();
        let result = self.promote_to_hotfix_locked();
        lock.release();
        let mut report = result?;
        report.lock_tag = Some(lock_tag);
        Ok(report)
    }

    fn promote_to_hotfix_locked(&self) -> Result<OperationReport> {
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;

        // A hotfix line is a release branch whose version is already in
        // production and whose manifest is the hotfix variant.
        let mut target: Option<(Version, Manifest)> = None;
        for version in self.release_branch_versions()? {
            if !index.is_production(version) {
                continue;
            }
            if let Some(manifest) = self.manifest_on_release_branch(version)? {
                if !manifest.staged().is_empty() {
                    target = Some((version, manifest));
                    break;
                }
            }
        }
        let (version, manifest) = target.ok_or(PreconditionError::NothingToPromote)?;
        let n = index.next_hotfix_number(version);
        let staged = manifest.staged();
        let release_branch = refs::release_branch(version);

        // Snapshot on the release branch; the hotfix manifest retires with
        // the promotion.
        self.checkout_fresh(&release_branch)?;
        let store = self.manifest_store();
        let hotfix_file = ReleaseFile::new(version, ReleaseFileKind::Hotfix(n));
        let snapshot_path = store.write_snapshot(hotfix_file, &staged)?;
        let mut commit_files = vec![snapshot_path];
        let manifest_file = ReleaseFile::new(version, ReleaseFileKind::HotfixManifest);
        if store.path_of(manifest_file).exists() {
            commit_files.push(store.delete(manifest_file)?);
        }
        self.commit_paths(&commit_files, &format!("Snapshot hotfix {version}-hotfix{n}"))?;
        self.git.push()?;

        self.git.checkout(PROD_BRANCH)?;
        self.git.merge_no_ff(
            &release_branch,
            &format!("Merge {release_branch} into {PROD_BRANCH} (hotfix{n})"),
        )?;

        // Rebuild artifacts from the current production schema plus the
        // hotfix patches.
        let label = hotfix_file.artifact_label();
        let artifacts = self.rebuild_artifacts(&staged, &label, version, hotfix_file)?;
        let mut commit_files = artifacts;
        commit_files.push(self.point_schema_symlink(&label)?);
        self.commit_paths(&commit_files, &format!("Hotfix {version}-hotfix{n}"))?;

        let tag = refs::hotfix_tag(version, n);
        self.git.create_tag(&tag, "HEAD", Some(&format!("Hotfix {version}-hotfix{n}")))?;
        if self.git.push_tag(&tag)? == PushOutcome::Rejected {
            return Err(CoordinationError::PushRejected(format!("tag {tag} already exists")).into());
        }

        let mut report = OperationReport::new("promote_hotfix")
            .identifier(version.to_string())
            .identifier(hotfix_file.file_name());
        report.tags_pushed.push(tag);

        self.delete_branch_everywhere(&release_branch, &mut report);
        self.git.push()?;

        info!(%version, n, "hotfix promoted");
        Ok(report)
    }
}
