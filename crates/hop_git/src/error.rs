//! Error types for the git layer.

use std::path::PathBuf;
use thiserror::Error;

/// Git operation result type.
pub type Result<T> = std::result::Result<T, GitError>;

/// Failures of individual git operations, classified so higher layers can
/// react (retry, roll back, surface a remediation hint).
#[derive(Error, Debug)]
pub enum GitError {
    #[error("not a git working copy: {0}")]
    NotARepository(PathBuf),

    #[error("worktree has uncommitted or untracked changes")]
    DirtyWorktree,

    #[error("branch not found: {0}")]
    BranchMissing(String),

    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("merge of '{branch}' produced conflicts (aborted)")]
    MergeConflict { branch: String },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("push rejected by remote: {0}")]
    PushRejected(String),

    #[error("tag already exists: {0}")]
    TagExists(String),

    #[error("tag not found: {0}")]
    TagMissing(String),

    #[error("not on expected branch: expected '{expected}', on '{actual}'")]
    NotOnBranch { expected: String, actual: String },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Outcome of a tag push, the atomic primitive behind reservations and
/// locks. `Rejected` means a concurrent writer won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Rejected,
}

/// Sync status of a local branch against its origin counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    Ahead,
    Behind,
    Diverged,
}
