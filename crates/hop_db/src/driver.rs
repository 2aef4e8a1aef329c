//! PostgreSQL operations through `psql`/`pg_dump` subprocesses.
//!
//! All database work goes through short-lived subprocesses with connection
//! parameters injected as `PG*` environment variables; nothing here keeps a
//! connection open across operations. SQL failures bubble up with the
//! stderr tail attached and are never swallowed.

use crate::error::{DbError, Result};
use chrono::Utc;
use hop_protocol::{ReleasePhase, Version};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Tables dumped into the versioned `metadata-<label>.sql` artifact.
const METADATA_TABLES: [&str; 3] = [
    "half_orm_meta.database",
    "half_orm_meta.hop_release",
    "half_orm_meta.hop_release_issue",
];

/// Connection parameters for the target database.
#[derive(Debug, Clone, Default)]
pub struct DbParams {
    pub dbname: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DbParams {
    pub fn new(dbname: impl Into<String>) -> Self {
        Self { dbname: dbname.into(), ..Default::default() }
    }

    fn apply(&self, cmd: &mut Command) {
        cmd.env("PGDATABASE", &self.dbname);
        if let Some(host) = &self.host {
            cmd.env("PGHOST", host);
        }
        if let Some(port) = self.port {
            cmd.env("PGPORT", port.to_string());
        }
        if let Some(user) = &self.user {
            cmd.env("PGUSER", user);
        }
        if let Some(password) = &self.password {
            cmd.env("PGPASSWORD", password);
        }
    }
}

/// The PostgreSQL driver.
#[derive(Clone)]
pub struct PgDriver {
    params: DbParams,
    python: String,
}

impl PgDriver {
    pub fn new(params: DbParams) -> Self {
        Self { params, python: "python3".to_string() }
    }

    /// Override the interpreter used for `.py` patch scripts.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn dbname(&self) -> &str {
        &self.params.dbname
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        self.params.apply(&mut cmd);
        cmd
    }

    fn run(&self, mut cmd: Command, context: &str) -> Result<String> {
        debug!(%context, "pg subprocess");
        let out = cmd.output()?;
        let stderr = String::from_utf8_lossy(&out.stderr).trim_end().to_string();
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string());
        }
        Err(classify(context, &stderr))
    }

    // ---- statements ------------------------------------------------------

    /// Run one statement and return the rows as `|`-separated tuples.
    pub fn query(&self, sql: &str) -> Result<Vec<String>> {
        let mut cmd = self.command("psql");
        cmd.args(["-X", "-q", "-tA", "-v", "ON_ERROR_STOP=1", "-c", sql]);
        let out = self.run(cmd, "psql -c")?;
        Ok(out.lines().map(|l| l.to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Run one statement, discarding output.
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.query(sql).map(|_| ())
    }

    /// Whether the server answers at all.
    pub fn is_reachable(&self) -> bool {
        self.query("SELECT 1").is_ok()
    }

    // ---- file application --------------------------------------------------

    /// Execute a single SQL file in a single session, stopping on the first
    /// error. Empty or whitespace-only files are skipped.
    pub fn apply_sql_file(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            debug!(file = %path.display(), "skipping empty SQL file");
            return Ok(());
        }
        let mut cmd = self.command("psql");
        cmd.args(["-X", "-q", "-v", "ON_ERROR_STOP=1", "-f"]).arg(path);
        self.run(cmd, "psql -f").map(|_| ()).map_err(|e| match e {
            DbError::CommandFailed { stderr, .. } => {
                DbError::SqlFailed { file: path.to_path_buf(), stderr }
            }
            other => other,
        })
    }

    /// Execute a patch script with the repository root as working directory
    /// and the connection parameters in the environment, so the script can
    /// open its own model/cursor context.
    pub fn apply_python_file(&self, path: &Path, repo_root: &Path) -> Result<String> {
        let mut cmd = self.command(&self.python);
        cmd.arg(path).current_dir(repo_root).env("HOP_DBNAME", &self.params.dbname);
        let out = cmd.output()?;
        let stderr = String::from_utf8_lossy(&out.stderr).trim_end().to_string();
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string());
        }
        Err(DbError::ScriptFailed {
            file: path.to_path_buf(),
            code: out.status.code().unwrap_or(-1),
            stderr: tail(&stderr),
        })
    }

    // ---- schema reset ------------------------------------------------------

    /// Non-system schemas owned by the connected role.
    pub fn list_owned_schemas(&self) -> Result<Vec<String>> {
        self.query(
            "SELECT n.nspname FROM pg_catalog.pg_namespace n \
             JOIN pg_catalog.pg_roles r ON n.nspowner = r.oid \
             WHERE r.rolname = current_user \
               AND n.nspname NOT LIKE 'pg\\_%' \
               AND n.nspname <> 'information_schema' \
             ORDER BY n.nspname",
        )
    }

    /// Bring the database to the exact state of a schema snapshot without
    /// superuser rights: drop every owned non-system schema, recreate
    /// `public`, then load the snapshot. Extensions, foreign servers, event
    /// triggers and database-level settings survive the reset.
    pub fn reset_to_schema(&self, schema_path: &Path) -> Result<()> {
        info!(snapshot = %schema_path.display(), "resetting database to schema snapshot");
        for schema in self.list_owned_schemas()? {
            self.execute(&format!("DROP SCHEMA \"{schema}\" CASCADE"))?;
        }
        self.execute("CREATE SCHEMA IF NOT EXISTS public")?;
        self.apply_sql_file(schema_path)
    }

    // ---- dumps -------------------------------------------------------------

    /// `pg_dump --schema-only` into `model/schema-<label>.sql`.
    pub fn dump_schema(&self, model_dir: &Path, label: &str) -> Result<PathBuf> {
        let out_path = model_dir.join(format!("schema-{label}.sql"));
        let mut cmd = self.command("pg_dump");
        cmd.args(["--schema-only", "--no-owner", "-f"]).arg(&out_path);
        self.run(cmd, "pg_dump --schema-only")?;
        info!(file = %out_path.display(), "schema dumped");
        Ok(out_path)
    }

    /// `pg_dump --data-only` of the release-tracking tables into
    /// `model/metadata-<label>.sql`.
    pub fn dump_metadata(&self, model_dir: &Path, label: &str) -> Result<PathBuf> {
        let out_path = model_dir.join(format!("metadata-{label}.sql"));
        let mut cmd = self.command("pg_dump");
        cmd.args(["--data-only", "--no-owner"]);
        for table in METADATA_TABLES {
            cmd.arg(format!("--table={table}"));
        }
        cmd.arg("-f").arg(&out_path);
        self.run(cmd, "pg_dump --data-only")?;
        Ok(out_path)
    }

    /// Optional seed dump of application tables into
    /// `model/seed-<label>.sql`. Returns `None` when no tables were given.
    pub fn dump_seed(
        &self,
        model_dir: &Path,
        label: &str,
        tables: &[String],
    ) -> Result<Option<PathBuf>> {
        if tables.is_empty() {
            return Ok(None);
        }
        let out_path = model_dir.join(format!("seed-{label}.sql"));
        let mut cmd = self.command("pg_dump");
        cmd.args(["--data-only", "--no-owner"]);
        for table in tables {
            cmd.arg(format!("--table={table}"));
        }
        cmd.arg("-f").arg(&out_path);
        self.run(cmd, "pg_dump --data-only (seed)")?;
        Ok(Some(out_path))
    }

    /// Plain `pg_dump` of the whole database, used for pre-deploy backups.
    pub fn dump_all(&self, out_path: &Path) -> Result<()> {
        let mut cmd = self.command("pg_dump");
        cmd.args(["--no-owner", "-f"]).arg(out_path);
        self.run(cmd, "pg_dump")?;
        Ok(())
    }

    // ---- release tracking ----------------------------------------------------

    /// The authoritative current version of the attached database: the
    /// `half_orm_meta.hop_release` row with the highest `created_at`.
    /// `None` when the table is empty (fresh database).
    pub fn read_current_version(&self) -> Result<Option<Version>> {
        let rows = self.query(
            "SELECT major, minor, patch FROM half_orm_meta.hop_release \
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let Some(row) = rows.first() else { return Ok(None) };
        let mut cols = row.split('|');
        let field = |c: Option<&str>| -> Result<u32> {
            c.and_then(|s| s.parse().ok()).ok_or_else(|| DbError::Malformed {
                context: "hop_release row",
                detail: row.clone(),
            })
        };
        Ok(Some(Version::new(
            field(cols.next())?,
            field(cols.next())?,
            field(cols.next())?,
        )))
    }

    /// Insert a tracking row at deploy time.
    pub fn write_release_row(&self, version: Version, phase: ReleasePhase) -> Result<()> {
        let (pre_release, pre_release_num) = match phase {
            ReleasePhase::Development | ReleasePhase::Production => ("NULL".into(), "NULL".into()),
            ReleasePhase::Candidate(n) => ("'rc'".to_string(), n.to_string()),
            ReleasePhase::Hotfix(n) => ("'hotfix'".to_string(), n.to_string()),
        };
        let created_at = Utc::now().to_rfc3339();
        self.execute(&format!(
            "INSERT INTO half_orm_meta.hop_release \
             (major, minor, patch, pre_release, pre_release_num, created_at) \
             VALUES ({}, {}, {}, {}, {}, '{}')",
            version.major, version.minor, version.patch, pre_release, pre_release_num, created_at
        ))
    }
}

/// Map psql/pg_dump stderr to the connection-failure taxonomy; everything
/// else stays a command failure with the stderr tail.
fn classify(context: &str, stderr: &str) -> DbError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("could not connect")
        || lowered.contains("connection refused")
        || lowered.contains("could not translate host name")
        || lowered.contains("server closed the connection")
        || lowered.contains("timeout expired")
        || lowered.contains("is the server running")
    {
        return DbError::Unreachable(tail(stderr));
    }
    if lowered.contains("password authentication failed")
        || lowered.contains("no password supplied")
        || (lowered.contains("role \"") && lowered.contains("does not exist"))
    {
        return DbError::AuthFailed(tail(stderr));
    }
    if lowered.contains("permission denied") || lowered.contains("must be owner") {
        return DbError::PermissionDenied(tail(stderr));
    }
    DbError::CommandFailed { command: context.to_string(), stderr: tail(stderr) }
}

fn tail(stderr: &str) -> String {
    const KEEP: usize = 8;
    let lines: Vec<&str> = stderr.lines().collect();
    if lines.len() <= KEEP {
        stderr.to_string()
    } else {
        lines[lines.len() - KEEP..].join("\n")
    }
}
