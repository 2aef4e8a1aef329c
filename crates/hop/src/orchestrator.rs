//! Dependency wiring and the stable API consumed by the CLI collaborator.
//!
//! The orchestrator owns the working copy exclusively; drivers receive a
//! borrowed reference for the duration of a single operation. Operations
//! are gated by the context table computed at startup and return
//! structured reports or typed errors.

use crate::collab::{
    BackupStore, Database, DirBackupStore, NoopGenerator, PgSchemaModel, PytestRunner,
    SchemaGenerator, SchemaModel, TestRunner,
};
use crate::context::{Context, Operation};
use crate::deploy::Deployer;
use crate::error::{PreconditionError, Result};
use crate::migrate::{MigrationOutcome, Migrator};
use crate::patch::PatchLifecycle;
use crate::release::ReleaseLifecycle;
use crate::repo::Repo;
use crate::report::OperationReport;
use hop_db::{DbError, DbParams, PgDriver};
use hop_git::GitDriver;
use hop_protocol::{refs, Level, Version, PROD_BRANCH};
use hop_store::{ManifestStore, ReleaseIndex};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// The workflow façade.
pub struct Orchestrator {
    repo: Repo,
    git: GitDriver,
    db: Box<dyn Database>,
    model: Box<dyn SchemaModel>,
    generator: Box<dyn SchemaGenerator>,
    backups: Box<dyn BackupStore>,
    tests: Box<dyn TestRunner>,
    seed_tables: Vec<String>,
    context: Context,
}

impl Orchestrator {
    /// Open a repository with the default collaborators: live PostgreSQL,
    /// pg-backed introspection, pytest gate, directory backups, no code
    /// generator.
    pub fn open(root: impl AsRef<Path>, db_params: DbParams) -> Result<Self> {
        let repo = Repo::open(root.as_ref())?;
        let git = GitDriver::open(root.as_ref())?;
        let driver = PgDriver::new(db_params);
        let backups_dir = repo.paths().backups_dir();
        Self::with_collaborators(
            repo,
            git,
            Box::new(driver.clone()),
            Box::new(PgSchemaModel::new(driver)),
            Box::new(NoopGenerator),
            Box::new(DirBackupStore::new(backups_dir)),
            Box::new(PytestRunner::new()),
        )
    }

    /// Full constructor; tests substitute recording fakes here.
    pub fn with_collaborators(
        repo: Repo,
        git: GitDriver,
        db: Box<dyn Database>,
        model: Box<dyn SchemaModel>,
        generator: Box<dyn SchemaGenerator>,
        backups: Box<dyn BackupStore>,
        tests: Box<dyn TestRunner>,
    ) -> Result<Self> {
        let context = compute_context(&repo, &git)?;
        Ok(Self {
            repo,
            git,
            db,
            model,
            generator,
            backups,
            tests,
            seed_tables: Vec::new(),
            context,
        })
    }

    /// Tables to include in the optional seed dump of promotions.
    pub fn with_seed_tables(mut self, tables: Vec<String>) -> Self {
        self.seed_tables = tables;
        self
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn context(&self) -> Context {
        self.context
    }

    fn gate(&self, op: Operation) -> Result<()> {
        if !self.context.allows(op) {
            return Err(PreconditionError::NotAllowed {
                operation: op.name().to_string(),
                context: self.context.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn patches(&self) -> PatchLifecycle<'_> {
        PatchLifecycle::new(
            &self.repo,
            &self.git,
            self.db.as_ref(),
            self.model.as_ref(),
            self.generator.as_ref(),
            self.tests.as_ref(),
        )
    }

    fn releases(&self) -> ReleaseLifecycle<'_> {
        ReleaseLifecycle::new(&self.repo, &self.git, self.db.as_ref(), &self.seed_tables)
    }

    // ---- operations ------------------------------------------------------

    pub fn new_release(&self, level: Level) -> Result<OperationReport> {
        self.gate(Operation::NewRelease)?;
        self.releases().create_release(level)
    }

    pub fn create_patch(&self, id: &str) -> Result<OperationReport> {
        self.gate(Operation::CreatePatch)?;
        self.patches().create_patch(id)
    }

    pub fn apply_patch(&self) -> Result<OperationReport> {
        self.gate(Operation::ApplyPatch)?;
        self.patches().apply_patch()
    }

    pub fn merge_patch(&self) -> Result<OperationReport> {
        self.gate(Operation::MergePatch)?;
        self.patches().merge_patch()
    }

    pub fn promote_rc(&self) -> Result<OperationReport> {
        self.gate(Operation::PromoteRc)?;
        self.releases().promote_to_rc()
    }

    pub fn promote_prod(&self) -> Result<OperationReport> {
        self.gate(Operation::PromoteProd)?;
        self.releases().promote_to_prod()
    }

    pub fn hotfix_open(&self, version: Version) -> Result<OperationReport> {
        self.gate(Operation::HotfixOpen)?;
        self.releases().hotfix_open(version)
    }

    pub fn promote_hotfix(&self) -> Result<OperationReport> {
        self.gate(Operation::PromoteHotfix)?;
        self.releases().promote_to_hotfix()
    }

    pub fn deploy(&self, target: Version) -> Result<OperationReport> {
        self.gate(Operation::Deploy)?;
        Deployer::new(&self.repo, self.db.as_ref(), self.backups.as_ref()).deploy(target)
    }

    /// Run pending repository-layout migrations.
    pub fn migrate(&mut self) -> Result<Vec<(Version, MigrationOutcome)>> {
        let outcomes = Migrator::new(&mut self.repo, &self.git).run_pending()?;
        self.context = compute_context(&self.repo, &self.git)?;
        Ok(outcomes)
    }

    /// A read-only summary of the repository and database state.
    pub fn status(&self) -> Result<StatusReport> {
        self.gate(Operation::Status)?;
        let branch = self.git.current_branch().unwrap_or_else(|_| "(detached)".to_string());
        let index = ReleaseIndex::scan(&self.repo.paths().releases_dir())?;
        let store = ManifestStore::new(self.repo.paths().releases_dir());

        let mut developments = Vec::new();
        for (version, hotfix) in index.development_versions() {
            let manifest = store.load(version)?;
            developments.push(DevelopmentStatus {
                version: version.to_string(),
                hotfix,
                patches: manifest
                    .entries()
                    .iter()
                    .map(|(id, state)| PatchStatus {
                        id: id.to_string(),
                        state: state.to_string(),
                    })
                    .collect(),
            });
        }

        // The database is optional for status; fall back to the symlink.
        let database_version = match self.db.read_current_version() {
            Ok(v) => v.map(|v| v.to_string()),
            Err(DbError::Unreachable(_)) => {
                warn!("database unreachable; reporting the working-copy version");
                Some(self.repo.production_version().to_string())
            }
            Err(e) => {
                warn!("database version lookup failed: {e}");
                None
            }
        };

        Ok(StatusReport {
            branch,
            context: self.context,
            production_version: self.repo.production_version().to_string(),
            database_version,
            active_rc: index
                .active_rc()
                .map(|(v, n)| format!("{v}-rc{n}")),
            developments,
        })
    }
}

/// Classify the checkout for the operation-gating table.
fn compute_context(repo: &Repo, git: &GitDriver) -> Result<Context> {
    if !repo.config().devel {
        return Ok(Context::SyncOnly);
    }
    if !git.is_clean()? {
        return Ok(Context::Dirty);
    }
    let branch = match git.current_branch() {
        Ok(branch) => branch,
        Err(_) => return Ok(Context::Dirty),
    };
    if branch == PROD_BRANCH {
        return Ok(Context::DevProd);
    }
    if refs::parse_release_branch(&branch).is_some()
        || refs::parse_patch_branch(&branch).is_some()
        || refs::parse_validate_branch(&branch).is_some()
    {
        return Ok(Context::DevDev);
    }
    // Unknown branch in a development checkout: patch-level operations
    // will enforce their own branch preconditions.
    Ok(Context::DevDev)
}

/// The `status` payload.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub branch: String,
    pub context: Context,
    pub production_version: String,
    pub database_version: Option<String>,
    pub active_rc: Option<String>,
    pub developments: Vec<DevelopmentStatus>,
}

#[derive(Debug, Serialize)]
pub struct DevelopmentStatus {
    pub version: String,
    pub hotfix: bool,
    pub patches: Vec<PatchStatus>,
}

#[derive(Debug, Serialize)]
pub struct PatchStatus {
    pub id: String,
    pub state: String,
}
