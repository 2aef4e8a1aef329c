//! Seams for the external collaborators: the database, the schema model,
//! the code generator, the backup store and the test runner.
//!
//! The workflow code depends on these traits only; `PgDriver` and the
//! default implementations below are wired in by the orchestrator builder
//! so tests can substitute recording fakes.

use crate::error::CollabError;
use chrono::Utc;
use hop_db::{DbError, PgDriver};
use hop_protocol::{ReleasePhase, Version};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// The database operations the lifecycles need.
pub trait Database {
    fn reset_to_schema(&self, schema_path: &Path) -> Result<(), DbError>;
    fn apply_sql_file(&self, path: &Path) -> Result<(), DbError>;
    fn apply_script(&self, path: &Path, repo_root: &Path) -> Result<(), DbError>;
    fn dump_schema(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError>;
    fn dump_metadata(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError>;
    fn dump_seed(
        &self,
        model_dir: &Path,
        label: &str,
        tables: &[String],
    ) -> Result<Option<PathBuf>, DbError>;
    fn dump_all(&self, out_path: &Path) -> Result<(), DbError>;
    fn read_current_version(&self) -> Result<Option<Version>, DbError>;
    fn write_release_row(&self, version: Version, phase: ReleasePhase) -> Result<(), DbError>;
}

impl Database for PgDriver {
    fn reset_to_schema(&self, schema_path: &Path) -> Result<(), DbError> {
        PgDriver::reset_to_schema(self, schema_path)
    }

    fn apply_sql_file(&self, path: &Path) -> Result<(), DbError> {
        PgDriver::apply_sql_file(self, path)
    }

    fn apply_script(&self, path: &Path, repo_root: &Path) -> Result<(), DbError> {
        PgDriver::apply_python_file(self, path, repo_root).map(|_| ())
    }

    fn dump_schema(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError> {
        PgDriver::dump_schema(self, model_dir, label)
    }

    fn dump_metadata(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError> {
        PgDriver::dump_metadata(self, model_dir, label)
    }

    fn dump_seed(
        &self,
        model_dir: &Path,
        label: &str,
        tables: &[String],
    ) -> Result<Option<PathBuf>, DbError> {
        PgDriver::dump_seed(self, model_dir, label, tables)
    }

    fn dump_all(&self, out_path: &Path) -> Result<(), DbError> {
        PgDriver::dump_all(self, out_path)
    }

    fn read_current_version(&self) -> Result<Option<Version>, DbError> {
        PgDriver::read_current_version(self)
    }

    fn write_release_row(&self, version: Version, phase: ReleasePhase) -> Result<(), DbError> {
        PgDriver::write_release_row(self, version, phase)
    }
}

/// A summary of the introspected schema, re-read after every apply step.
#[derive(Debug, Clone, Default)]
pub struct SchemaInfo {
    /// Qualified relation names, `schema.table`.
    pub relations: Vec<String>,
}

/// Schema introspection, consumed through an interface only.
pub trait SchemaModel {
    fn introspect(&self) -> Result<SchemaInfo, CollabError>;
}

/// Introspection through the live database.
pub struct PgSchemaModel {
    db: PgDriver,
}

impl PgSchemaModel {
    pub fn new(db: PgDriver) -> Self {
        Self { db }
    }
}

impl SchemaModel for PgSchemaModel {
    fn introspect(&self) -> Result<SchemaInfo, CollabError> {
        let rows = self.db.query(
            "SELECT table_schema || '.' || table_name \
             FROM information_schema.tables \
             WHERE table_schema NOT LIKE 'pg\\_%' \
               AND table_schema <> 'information_schema' \
             ORDER BY 1",
        )?;
        Ok(SchemaInfo { relations: rows })
    }
}

/// The code-generation step invoked after successful SQL application.
/// Returns the paths it wrote so a failed apply can revert them.
pub trait SchemaGenerator {
    fn generate(&self, info: &SchemaInfo, repo_root: &Path) -> Result<Vec<PathBuf>, CollabError>;

    /// Remove files produced by a generate call that is being rolled back.
    fn revert(&self, paths: &[PathBuf]) -> Result<(), CollabError> {
        for path in paths {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Generator used when no code generation is configured.
pub struct NoopGenerator;

impl SchemaGenerator for NoopGenerator {
    fn generate(&self, _info: &SchemaInfo, _repo_root: &Path) -> Result<Vec<PathBuf>, CollabError> {
        Ok(Vec::new())
    }
}

/// Where pre-deployment snapshots go. The store is opaque: callers get a
/// path back for the operator, nothing else.
pub trait BackupStore {
    fn dump(&self, db: &dyn Database, label: &str) -> Result<PathBuf, CollabError>;
}

/// Backups as plain `pg_dump` files under a directory.
pub struct DirBackupStore {
    dir: PathBuf,
}

impl DirBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BackupStore for DirBackupStore {
    fn dump(&self, db: &dyn Database, label: &str) -> Result<PathBuf, CollabError> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let out = self.dir.join(format!("{label}-{stamp}.sql"));
        db.dump_all(&out)?;
        info!(backup = %out.display(), "database backed up");
        Ok(out)
    }
}

/// Outcome of the automated test gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { exit_code: i32, tail: String },
    NotConfigured,
}

/// The test gate run before a patch is integrated.
pub trait TestRunner {
    /// A human-readable description of the detected runner, if any.
    fn detect(&self, repo_root: &Path) -> Option<String>;

    fn run(&self, repo_root: &Path) -> Result<TestOutcome, CollabError>;
}

/// Pytest detection and execution, the default gate.
pub struct PytestRunner {
    python: String,
}

impl PytestRunner {
    pub fn new() -> Self {
        Self { python: "python3".to_string() }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

impl Default for PytestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner for PytestRunner {
    fn detect(&self, repo_root: &Path) -> Option<String> {
        if repo_root.join("pytest.ini").is_file() {
            return Some("pytest.ini".to_string());
        }
        if repo_root.join("tests").is_dir() {
            return Some("tests/ directory".to_string());
        }
        let pyproject = repo_root.join("pyproject.toml");
        if let Ok(content) = std::fs::read_to_string(&pyproject) {
            if content.contains("[tool.pytest") {
                return Some("pyproject.toml [tool.pytest]".to_string());
            }
        }
        None
    }

    fn run(&self, repo_root: &Path) -> Result<TestOutcome, CollabError> {
        if self.detect(repo_root).is_none() {
            return Ok(TestOutcome::NotConfigured);
        }
        let out = Command::new(&self.python)
            .args(["-m", "pytest"])
            .current_dir(repo_root)
            .output()?;
        if out.status.success() {
            return Ok(TestOutcome::Passed);
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let tail: Vec<&str> = stdout.lines().rev().take(20).collect();
        Ok(TestOutcome::Failed {
            exit_code: out.status.code().unwrap_or(-1),
            tail: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        })
    }
}
