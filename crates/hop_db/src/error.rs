//! Error types for the database layer.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors. Connection failures are classified so the caller can
/// distinguish an unreachable server from bad credentials or missing
/// privileges; SQL errors bubble up with the stderr tail, never swallowed.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("SQL execution failed in {file}: {stderr}")]
    SqlFailed { file: PathBuf, stderr: String },

    #[error("script execution failed in {file} (exit {code}): {stderr}")]
    ScriptFailed { file: PathBuf, code: i32, stderr: String },

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected output from {context}: {detail}")]
    Malformed { context: &'static str, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
