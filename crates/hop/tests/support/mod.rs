//! End-to-end test world: a bare origin, hop-configured working clones,
//! and recording fakes for the database and collaborator seams.

#![allow(dead_code)]

use anyhow::Result;
use hop::collab::{
    BackupStore, Database, NoopGenerator, SchemaGenerator, SchemaInfo, SchemaModel, TestOutcome,
    TestRunner,
};
use hop::error::CollabError;
use hop::{Orchestrator, Repo};
use hop_db::DbError;
use hop_git::GitDriver;
use hop_protocol::{HopPaths, ReleasePhase, RepoConfig, Version};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use tempfile::TempDir;

pub struct TestWorld {
    pub tmp: TempDir,
    pub origin: PathBuf,
}

impl TestWorld {
    pub fn new() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let origin = tmp.path().join("origin.git");
        run_git(tmp.path(), &["init", "--bare", "--initial-branch", "ho-prod", "origin.git"])?;
        Ok(Self { tmp, origin })
    }

    /// Build the first working copy: hop config, optional production state
    /// (snapshot file, schema artifact, symlink, release tag), all
    /// committed and pushed on ho-prod.
    pub fn seed(&self, name: &str, production: Option<&str>) -> Result<PathBuf> {
        let root = self.tmp.path().join(name);
        let git = GitDriver::init(&root, "ho-prod")?;
        git.set_identity("hop test", "hop@test.invalid")?;
        git.set_origin(self.origin.to_str().unwrap())?;

        let paths = HopPaths::new(&root);
        std::fs::create_dir_all(paths.releases_dir())?;
        std::fs::create_dir_all(paths.model_dir())?;

        let mut config = RepoConfig::new("blog");
        config.git_origin = self.origin.to_string_lossy().into_owned();
        config.devel = true;
        config.hop_version = "0.17.1".to_string();
        config.save(&paths.config_file())?;

        std::fs::write(root.join(".gitignore"), ".hop/backups/\n")?;

        if let Some(version) = production {
            std::fs::write(
                paths.releases_dir().join(format!("{version}.txt")),
                format!("# Release {version}\n"),
            )?;
            std::fs::write(
                paths.schema_file(version),
                format!("-- schema {version}\n"),
            )?;
            std::os::unix::fs::symlink(
                format!("schema-{version}.sql"),
                paths.schema_symlink(),
            )?;
        }

        run_git(&root, &["add", "-A"])?;
        run_git(&root, &["commit", "-m", "Initialize repository"])?;
        git.push_branch("ho-prod", true)?;

        if let Some(version) = production {
            let tag = format!("release-{version}");
            git.create_tag(&tag, "HEAD", Some(&format!("Release {version}")))?;
            git.push_tag(&tag)?;
        }
        Ok(root)
    }

    /// Clone a second working copy and make it hop-ready.
    pub fn clone(&self, name: &str) -> Result<PathBuf> {
        let root = self.tmp.path().join(name);
        run_git(
            self.tmp.path(),
            &["clone", self.origin.to_str().unwrap(), root.to_str().unwrap()],
        )?;
        let git = GitDriver::open(&root)?;
        git.set_identity("hop test", "hop@test.invalid")?;
        // The clone's config carries the seeding clone's origin path, which
        // is the same bare repository.
        Ok(root)
    }
}

pub fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git").args(args).current_dir(cwd).output()?;
    anyhow::ensure!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

pub fn git_log_messages(root: &Path, branch: &str, n: usize) -> Vec<String> {
    let out = Command::new("git")
        .args(["log", &format!("-{n}"), "--format=%B%x00", branch])
        .current_dir(root)
        .output()
        .unwrap();
    String::from_utf8_lossy(&out.stdout)
        .split('\0')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

// ---- fakes ----------------------------------------------------------------

#[derive(Default)]
pub struct DbLog {
    pub calls: Vec<String>,
}

/// A recording database fake. `fail_on` makes any apply touching a file
/// whose name contains the needle fail like a SQL error.
#[derive(Clone)]
pub struct FakeDb {
    pub log: Rc<RefCell<DbLog>>,
    pub current_version: Rc<RefCell<Option<Version>>>,
    pub fail_on: Rc<RefCell<Option<String>>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(DbLog::default())),
            current_version: Rc::new(RefCell::new(None)),
            fail_on: Rc::new(RefCell::new(None)),
        }
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().calls.push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().calls.clone()
    }

    fn check_fail(&self, path: &Path) -> Result<(), DbError> {
        if let Some(needle) = self.fail_on.borrow().as_deref() {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.contains(needle) {
                return Err(DbError::SqlFailed {
                    file: path.to_path_buf(),
                    stderr: "ERROR: forced test failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().into_owned()
}

impl Database for FakeDb {
    fn reset_to_schema(&self, schema_path: &Path) -> Result<(), DbError> {
        self.record(format!("reset:{}", file_name(schema_path)));
        Ok(())
    }

    fn apply_sql_file(&self, path: &Path) -> Result<(), DbError> {
        self.check_fail(path)?;
        self.record(format!("sql:{}", file_name(path)));
        Ok(())
    }

    fn apply_script(&self, path: &Path, _repo_root: &Path) -> Result<(), DbError> {
        self.check_fail(path)?;
        self.record(format!("py:{}", file_name(path)));
        Ok(())
    }

    fn dump_schema(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError> {
        let out = model_dir.join(format!("schema-{label}.sql"));
        std::fs::write(&out, format!("-- schema {label}\n"))?;
        self.record(format!("dump-schema:{label}"));
        Ok(out)
    }

    fn dump_metadata(&self, model_dir: &Path, label: &str) -> Result<PathBuf, DbError> {
        let out = model_dir.join(format!("metadata-{label}.sql"));
        std::fs::write(&out, format!("-- metadata {label}\n"))?;
        self.record(format!("dump-metadata:{label}"));
        Ok(out)
    }

    fn dump_seed(
        &self,
        _model_dir: &Path,
        _label: &str,
        _tables: &[String],
    ) -> Result<Option<PathBuf>, DbError> {
        Ok(None)
    }

    fn dump_all(&self, out_path: &Path) -> Result<(), DbError> {
        std::fs::write(out_path, "-- full dump\n")?;
        self.record(format!("dump-all:{}", file_name(out_path)));
        Ok(())
    }

    fn read_current_version(&self) -> Result<Option<Version>, DbError> {
        Ok(*self.current_version.borrow())
    }

    fn write_release_row(&self, version: Version, phase: ReleasePhase) -> Result<(), DbError> {
        self.record(format!("release-row:{version}:{phase}"));
        Ok(())
    }
}

pub struct FakeModel;

impl SchemaModel for FakeModel {
    fn introspect(&self) -> Result<SchemaInfo, CollabError> {
        Ok(SchemaInfo { relations: vec!["public.t".to_string()] })
    }
}

/// A generator that writes different content on every call; merging a
/// patch under it trips the idempotency gate.
pub struct ChangingGenerator {
    counter: RefCell<u32>,
}

impl ChangingGenerator {
    pub fn new() -> Self {
        Self { counter: RefCell::new(0) }
    }
}

impl SchemaGenerator for ChangingGenerator {
    fn generate(&self, _info: &SchemaInfo, repo_root: &Path) -> Result<Vec<PathBuf>, CollabError> {
        let mut counter = self.counter.borrow_mut();
        *counter += 1;
        let path = repo_root.join("generated_model.rs");
        std::fs::write(&path, format!("// generation {}\n", *counter))?;
        Ok(vec![path])
    }
}

/// A test gate with a scripted outcome.
pub struct FakeTests {
    pub outcome: RefCell<TestOutcome>,
}

impl FakeTests {
    pub fn passing() -> Self {
        Self { outcome: RefCell::new(TestOutcome::Passed) }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            outcome: RefCell::new(TestOutcome::Failed {
                exit_code,
                tail: "1 failed".to_string(),
            }),
        }
    }
}

impl TestRunner for FakeTests {
    fn detect(&self, _repo_root: &Path) -> Option<String> {
        Some("scripted".to_string())
    }

    fn run(&self, _repo_root: &Path) -> Result<TestOutcome, CollabError> {
        Ok(self.outcome.borrow().clone())
    }
}

/// Backups as plain files under the temp dir.
pub struct FakeBackups {
    pub dir: PathBuf,
    pub taken: RefCell<Vec<String>>,
}

impl FakeBackups {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, taken: RefCell::new(Vec::new()) }
    }
}

impl BackupStore for FakeBackups {
    fn dump(&self, db: &dyn Database, label: &str) -> Result<PathBuf, CollabError> {
        std::fs::create_dir_all(&self.dir)?;
        let out = self.dir.join(format!("{label}.sql"));
        db.dump_all(&out)?;
        self.taken.borrow_mut().push(label.to_string());
        Ok(out)
    }
}

/// A fresh orchestrator over `root`, one per operation like the CLI does.
pub fn orch(root: &Path, db: &FakeDb) -> Orchestrator {
    orch_with(root, db, Box::new(NoopGenerator), Box::new(FakeTests::passing()))
}

pub fn orch_with(
    root: &Path,
    db: &FakeDb,
    generator: Box<dyn SchemaGenerator>,
    tests: Box<dyn TestRunner>,
) -> Orchestrator {
    let repo = Repo::open(root).expect("hop repo");
    let git = GitDriver::open(root).expect("git repo");
    let backups = FakeBackups::new(root.join(".hop/backups"));
    Orchestrator::with_collaborators(
        repo,
        git,
        Box::new(db.clone()),
        Box::new(FakeModel),
        generator,
        Box::new(backups),
        tests,
    )
    .expect("orchestrator")
}
