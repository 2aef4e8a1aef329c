//! The patch lifecycle: create, apply, merge.
//!
//! `create_patch` is tag-first: the `patch-id/<id>` reservation push is the
//! point of no return, everything before it rolls back locally. `merge_patch`
//! runs the mandatory validation gate on an ephemeral `ho-validate/<id>`
//! branch that is deleted on every exit path; the fast-forward into the
//! release branch is the atomic commit point.

use crate::collab::{Database, SchemaGenerator, SchemaModel, TestOutcome, TestRunner};
use crate::error::{
    CoordinationError, Error, PreconditionError, Result, ValidationError,
};
use crate::repo::Repo;
use crate::scan;
use crate::report::OperationReport;
use hop_git::{GitDriver, LockService, SyncState};
use hop_protocol::refs;
use hop_protocol::{LockScope, PatchId, PatchState, Version};
use hop_store::{is_bootstrap_file, ManifestStore, PatchStore, ReleaseIndex};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const PUSH_RETRIES: u32 = 3;
const PUSH_BACKOFF_BASE_MS: u64 = 500;

pub struct PatchLifecycle<'a> {
    repo: &'a Repo,
    git: &'a GitDriver,
    db: &'a dyn Database,
    model: &'a dyn SchemaModel,
    generator: &'a dyn SchemaGenerator,
    tests: &'a dyn TestRunner,
}

impl<'a> PatchLifecycle<'a> {
    pub fn new(
        repo: &'a Repo,
        git: &'a GitDriver,
        db: &'a dyn Database,
        model: &'a dyn SchemaModel,
        generator: &'a dyn SchemaGenerator,
        tests: &'a dyn TestRunner,
    ) -> Self {
        Self { repo, git, db, model, generator, tests }
    }

    fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(self.repo.paths().releases_dir())
    }

    fn patch_store(&self) -> PatchStore {
        PatchStore::new(self.repo.paths().patches_dir())
    }

    /// The development version whose manifest contains `id`, if any.
    ///
    /// The origin release branches are authoritative (the patch branch's
    /// own copy of the manifest predates candidate registration); the
    /// worktree is the fallback when the remote cannot be reached.
    fn version_of_patch(&self, id: &PatchId) -> Result<Option<(Version, PatchState)>> {
        if self.git.fetch().is_ok() {
            for version in scan::remote_release_versions(self.git)? {
                if let Some(manifest) =
                    scan::manifest_on_release_branch(self.repo, self.git, version)?
                {
                    if let Some(state) = manifest.state_of(id) {
                        return Ok(Some((version, state)));
                    }
                }
            }
        }
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        let store = self.manifest_store();
        for (version, _) in index.development_versions() {
            let manifest = store.load(version)?;
            if let Some(state) = manifest.state_of(id) {
                return Ok(Some((version, state)));
            }
        }
        Ok(None)
    }

    // ---- create ----------------------------------------------------------

    /// Create a patch branch and reserve its id globally.
    pub fn create_patch(&self, raw_id: &str) -> Result<OperationReport> {
        let id = PatchId::parse(raw_id)
            .map_err(|_| PreconditionError::InvalidPatchId(raw_id.to_string()))?;

        // Preconditions: on a release branch, clean, synced.
        let branch = self.git.current_branch()?;
        let version = refs::parse_release_branch(&branch).ok_or_else(|| {
            PreconditionError::WrongBranch {
                expected: "ho-release/X.Y.Z".to_string(),
                actual: branch.clone(),
            }
        })?;
        if !self.git.is_clean()? {
            return Err(PreconditionError::DirtyWorktree.into());
        }
        self.git.fetch()?;
        match self.git.is_synced_with(&branch)? {
            SyncState::Synced | SyncState::Ahead => {}
            SyncState::Behind => self.git.pull_ff(&branch)?,
            SyncState::Diverged => {
                return Err(CoordinationError::Diverged { branch }.into());
            }
        }

        let patches = self.patch_store();
        if patches.exists(&id) {
            return Err(PreconditionError::PatchExists(id).into());
        }
        let patch_branch = refs::patch_branch(&id);
        if self.git.branch_exists(&patch_branch)?
            || self.git.remote_branch_exists(&patch_branch)?
        {
            return Err(PreconditionError::PatchExists(id).into());
        }
        // The manifest must exist and not already carry the id.
        let manifest = self.manifest_store().load(version)?;
        if manifest.contains(&id) {
            return Err(PreconditionError::PatchExists(id).into());
        }

        // Local construction; any failure here rolls back with no remote
        // side effects.
        if let Err(e) = self.build_patch_locally(&id, &patch_branch) {
            self.rollback_local_patch(&id, &patch_branch, &branch);
            return Err(e);
        }

        // Reservation: the point of no return.
        let locks = LockService::new(self.git);
        let tag = match locks.reserve_patch(&id, "HEAD") {
            Ok(tag) => tag,
            Err(e) => {
                self.rollback_local_patch(&id, &patch_branch, &branch);
                return Err(e.into());
            }
        };

        let mut report = OperationReport::new("create_patch")
            .identifier(id.to_string())
            .identifier(version.to_string());
        report.tags_pushed.push(tag);

        // Branch push with bounded retry. The reservation stands even if
        // this fails; the user pushes manually.
        if let Err(e) = self.push_with_retry(&patch_branch) {
            warn!("patch branch push failed after retries: {e}");
            report.status = format!(
                "warning: branch not pushed ({e}); run 'git push --set-upstream origin {patch_branch}'"
            );
        }

        // Manifest registration on the release branch, a separate step: a
        // failure leaves the reservation standing.
        if let Err(e) = self.register_candidate(&id, version, &branch) {
            warn!("manifest registration failed: {e}");
            if let Err(reset_err) = self.git.reset_hard("HEAD") {
                warn!("could not discard partial manifest edit: {reset_err}");
            }
            report.status = format!(
                "warning: '{id}' not registered in manifest ({e}); commit and push the manifest manually"
            );
        }

        self.git.checkout(&patch_branch)?;
        info!(%id, %version, "patch created");
        Ok(report)
    }

    fn build_patch_locally(&self, id: &PatchId, patch_branch: &str) -> Result<()> {
        self.git.checkout_new(patch_branch, "HEAD")?;
        let dir = self.patch_store().create(id)?;
        let rel = dir
            .strip_prefix(self.repo.paths().root())
            .unwrap_or(&dir)
            .to_path_buf();
        self.git.commit(&[&rel], &format!("Add Patches/{id} directory"))?;
        Ok(())
    }

    fn rollback_local_patch(&self, id: &PatchId, patch_branch: &str, release_branch: &str) {
        if let Err(e) = self.git.checkout(release_branch) {
            warn!("rollback: checkout {release_branch} failed: {e}");
        }
        match self.git.branch_exists(patch_branch) {
            Ok(true) => {
                if let Err(e) = self.git.delete_branch(patch_branch, true) {
                    warn!("rollback: delete {patch_branch} failed: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("rollback: branch check failed: {e}"),
        }
        if let Err(e) = self.patch_store().remove(id) {
            warn!("rollback: remove patch directory failed: {e}");
        }
    }

    fn push_with_retry(&self, branch: &str) -> Result<()> {
        let mut last: Option<Error> = None;
        for attempt in 0..PUSH_RETRIES {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(
                    PUSH_BACKOFF_BASE_MS << (attempt - 1),
                ));
            }
            match self.git.push_branch(branch, true) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(%branch, attempt, "push failed: {e}");
                    last = Some(e.into());
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::internal("push failed")))
    }

    fn register_candidate(
        &self,
        id: &PatchId,
        version: Version,
        release_branch: &str,
    ) -> Result<()> {
        self.git.checkout(release_branch)?;
        let path = self.manifest_store().add_candidate(version, id.clone(), None)?;
        let rel = path
            .strip_prefix(self.repo.paths().root())
            .unwrap_or(&path)
            .to_path_buf();
        self.git.commit(&[&rel], &format!("Add candidate {id} to release {version}"))?;
        self.git.push()?;
        Ok(())
    }

    // ---- apply -----------------------------------------------------------

    /// Replay the release context plus the current patch against a pristine
    /// schema, then regenerate code.
    pub fn apply_patch(&self) -> Result<OperationReport> {
        let branch = self.git.current_branch()?;
        let id = refs::parse_patch_branch(&branch)
            .or_else(|| refs::parse_validate_branch(&branch))
            .ok_or_else(|| PreconditionError::WrongBranch {
                expected: "ho-patch/<id>".to_string(),
                actual: branch.clone(),
            })?;

        let version = self.resolve_target_version(&id)?;
        self.apply_in_context(&id, version)?;

        Ok(OperationReport::new("apply_patch")
            .identifier(id.to_string())
            .identifier(version.to_string()))
    }

    fn resolve_target_version(&self, id: &PatchId) -> Result<Version> {
        if let Some((version, _)) = self.version_of_patch(id)? {
            return Ok(version);
        }
        // Not registered (manifest push may have failed at creation):
        // fall back to the highest development version.
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        index
            .development_versions()
            .last()
            .map(|(v, _)| *v)
            .ok_or_else(|| {
                PreconditionError::Manifest("no release under development".to_string()).into()
            })
    }

    /// The core replay shared by `apply_patch` and the merge validation
    /// gate. Applies staged patches plus `id` (in its recorded position
    /// when already staged, appended otherwise) against a pristine schema.
    pub(crate) fn apply_in_context(&self, id: &PatchId, version: Version) -> Result<()> {
        let patches = self.patch_store();
        if !patches.exists(id) {
            return Err(PreconditionError::PatchMissing(id.clone()).into());
        }
        patches.validate(id)?;
        let schema = self.repo.paths().schema_symlink();
        if !schema.exists() {
            return Err(PreconditionError::MissingSchema(schema).into());
        }

        // Release context: staged patches, with the current patch replacing
        // in place when staged, appended otherwise.
        let manifest = self.manifest_store().load(version)?;
        let mut sequence: Vec<PatchId> = manifest.staged();
        if !sequence.contains(id) {
            sequence.push(id.clone());
        }

        self.db.reset_to_schema(&schema)?;
        let result = self.apply_sequence(&sequence, id);
        if let Err(e) = result {
            // Preserve the original error; the reset is best-effort.
            if let Err(reset_err) = self.db.reset_to_schema(&schema) {
                warn!("rollback reset failed: {reset_err}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn apply_sequence(&self, sequence: &[PatchId], current: &PatchId) -> Result<()> {
        let patches = self.patch_store();
        let root = self.repo.paths().root().to_path_buf();
        for patch in sequence {
            for file in patches.executable_files(patch)? {
                if is_bootstrap_file(&file) {
                    // Bootstrap files seed fresh deployments only.
                    continue;
                }
                self.apply_file(patch, &file, &root)?;
            }
        }

        // Regenerate code from the resulting schema; revert its output if
        // generation itself fails midway.
        let info = self
            .model
            .introspect()
            .map_err(|e| Error::internal(format!("schema introspection failed: {e}")))?;
        match self.generator.generate(&info, &root) {
            Ok(produced) => {
                info!(count = produced.len(), "generator output refreshed");
                Ok(())
            }
            Err(e) => Err(ValidationError::ApplyFailed {
                patch: current.clone(),
                file: root.clone(),
                stage: "generate",
                detail: e.to_string(),
            }
            .into()),
        }
    }

    fn apply_file(&self, patch: &PatchId, file: &Path, root: &Path) -> Result<()> {
        let is_sql = file.extension().and_then(|e| e.to_str()) == Some("sql");
        let outcome = if is_sql {
            self.db.apply_sql_file(file)
        } else {
            self.db.apply_script(file, root)
        };
        outcome.map_err(|e| {
            ValidationError::ApplyFailed {
                patch: patch.clone(),
                file: file.to_path_buf(),
                stage: if is_sql { "sql" } else { "script" },
                detail: e.to_string(),
            }
            .into()
        })
    }

    // ---- merge -----------------------------------------------------------

    /// Integrate the current patch branch into its release branch, behind
    /// the validation gate.
    pub fn merge_patch(&self) -> Result<OperationReport> {
        let branch = self.git.current_branch()?;
        let id = refs::parse_patch_branch(&branch).ok_or_else(|| {
            PreconditionError::WrongBranch {
                expected: "ho-patch/<id>".to_string(),
                actual: branch.clone(),
            }
        })?;
        if !self.git.is_clean()? {
            return Err(PreconditionError::DirtyWorktree.into());
        }

        let (version, state) = self
            .version_of_patch(&id)?
            .ok_or_else(|| PreconditionError::UnregisteredPatch(id.clone()))?;
        if state == PatchState::Staged {
            return Err(PreconditionError::AlreadyStaged(id).into());
        }
        let release_branch = refs::release_branch(version);

        let locks = LockService::new(self.git);
        let lock = locks.acquire(LockScope::Release(version))?;
        let lock_tag = lock.tag().to_string();

        let result = self.merge_patch_locked(&id, version, &branch, &release_branch);
        lock.release();

        let mut report = result?;
        report.lock_tag = Some(lock_tag);
        Ok(report)
    }

    fn merge_patch_locked(
        &self,
        id: &PatchId,
        version: Version,
        patch_branch: &str,
        release_branch: &str,
    ) -> Result<OperationReport> {
        // Bring the release branch up to date without leaving the patch
        // branch; divergence is a hard refusal.
        self.git.fetch()?;
        if self.git.branch_exists(release_branch)? {
            match self.git.is_synced_with(release_branch)? {
                SyncState::Synced | SyncState::Ahead => {}
                SyncState::Behind => self.git.fast_forward_local(release_branch)?,
                SyncState::Diverged => {
                    return Err(CoordinationError::Diverged {
                        branch: release_branch.to_string(),
                    }
                    .into());
                }
            }
        } else if self.git.remote_branch_exists(release_branch)? {
            self.git
                .create_branch(release_branch, &format!("origin/{release_branch}"))?;
        } else {
            return Err(PreconditionError::UnknownVersion(version).into());
        }

        let validate_branch = refs::validate_branch(id);
        self.git.checkout_new(&validate_branch, release_branch)?;
        let mut guard = ValidateGuard {
            git: self.git,
            validate_branch: validate_branch.clone(),
            fallback_branch: patch_branch.to_string(),
            armed: true,
        };

        let report = self.validate_and_integrate(
            id,
            version,
            patch_branch,
            release_branch,
            &validate_branch,
        )?;
        // Success: the happy path already removed the validation branch.
        guard.armed = false;
        Ok(report)
    }

    fn validate_and_integrate(
        &self,
        id: &PatchId,
        version: Version,
        patch_branch: &str,
        release_branch: &str,
        validate_branch: &str,
    ) -> Result<OperationReport> {
        let store = self.manifest_store();

        // Replay already-staged patch branches in manifest order. Normally
        // a no-op: their content is already merged in the release branch
        // and the branches themselves are gone.
        let manifest = store.load(version)?;
        for staged in manifest.staged() {
            let staged_branch = refs::patch_branch(&staged);
            let merge_ref = if self.git.branch_exists(&staged_branch)? {
                Some(staged_branch.clone())
            } else if self.git.remote_branch_exists(&staged_branch)? {
                Some(format!("origin/{staged_branch}"))
            } else {
                None
            };
            if let Some(merge_ref) = merge_ref {
                self.git.merge(
                    &merge_ref,
                    &format!("Merge {staged_branch} into {validate_branch}"),
                )?;
            }
        }

        // The patch itself, no-ff, with the autoclose trailer.
        let merge_message = format!(
            "Merge {patch_branch} into {release_branch}\n\nCloses #{}",
            id.issue_number()
        );
        self.git.merge_no_ff(patch_branch, &merge_message)?;

        // Stage the patch in the manifest on the validation branch.
        let manifest_path = store.set_staged(version, id)?;
        let rel = manifest_path
            .strip_prefix(self.repo.paths().root())
            .unwrap_or(&manifest_path)
            .to_path_buf();
        self.git.commit(&[&rel], &format!("Stage {id} for release {version}"))?;

        // Idempotency replay: applying the declared state on top of itself
        // must leave the worktree untouched.
        self.apply_in_context(id, version)?;
        let changed = self.git.status_porcelain()?;
        if !changed.is_empty() {
            let paths: Vec<String> = changed
                .iter()
                .map(|line| line.split_whitespace().last().unwrap_or(line).to_string())
                .collect();
            // The violation is the error to surface; worktree cleanup is
            // best-effort.
            if let Err(e) = self.git.reset_hard("HEAD") {
                warn!("idempotency cleanup: reset failed: {e}");
            }
            if let Err(e) = self.git.clean_untracked() {
                warn!("idempotency cleanup: clean failed: {e}");
            }
            return Err(ValidationError::IdempotencyViolation { paths }.into());
        }

        // Test gate.
        match self.tests.run(self.repo.paths().root()) {
            Ok(TestOutcome::Passed) => info!("test suite passed"),
            Ok(TestOutcome::NotConfigured) => {
                warn!("no test runner configured; skipping the test gate")
            }
            Ok(TestOutcome::Failed { exit_code, tail }) => {
                return Err(ValidationError::TestsFailed { exit_code, tail }.into());
            }
            Err(e) => {
                return Err(Error::internal(format!("test runner failed to start: {e}")));
            }
        }

        // Atomic commit point: fast-forward the release branch onto the
        // validated state and publish it.
        self.git.checkout(release_branch)?;
        self.git.merge_ff_only(validate_branch)?;
        let headline = format!("[notify] merge_patch: {id} integrated into {release_branch}");
        let notification = format!(
            "{headline}\n\nOther candidate branches for {version} must refresh with:\ngit merge {release_branch}"
        );
        self.git.commit_empty(&notification)?;
        self.git.push()?;

        // Cleanup of the now-integrated refs.
        let mut report = OperationReport::new("merge_patch")
            .identifier(id.to_string())
            .identifier(version.to_string());
        report.notifications_emitted.push(headline);

        self.git.delete_branch(validate_branch, true)?;
        self.git.delete_branch(patch_branch, true)?;
        report.branches_deleted.push(validate_branch.to_string());
        report.branches_deleted.push(patch_branch.to_string());
        if self.git.remote_branch_exists(patch_branch)? {
            self.git.delete_remote_branch(patch_branch)?;
            report.branches_deleted.push(format!("origin/{patch_branch}"));
        }

        info!(%id, %version, "patch merged");
        Ok(report)
    }
}

/// Deletes the ephemeral validation branch on every non-success path.
struct ValidateGuard<'a> {
    git: &'a GitDriver,
    validate_branch: String,
    fallback_branch: String,
    armed: bool,
}

impl Drop for ValidateGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Leave the validation branch before deleting it; any dirt from a
        // failed replay is discarded with it.
        if let Ok(current) = self.git.current_branch() {
            if current == self.validate_branch {
                if let Err(e) = self.git.reset_hard("HEAD") {
                    warn!("validate cleanup: reset failed: {e}");
                }
                if let Err(e) = self.git.clean_untracked() {
                    warn!("validate cleanup: clean failed: {e}");
                }
                if let Err(e) = self.git.checkout(&self.fallback_branch) {
                    warn!("validate cleanup: checkout failed: {e}");
                    return;
                }
            }
        }
        match self.git.branch_exists(&self.validate_branch) {
            Ok(true) => {
                if let Err(e) = self.git.delete_branch(&self.validate_branch, true) {
                    warn!("validate cleanup: delete failed: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("validate cleanup: branch check failed: {e}"),
        }
    }
}
