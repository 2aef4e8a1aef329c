//! The workflow error taxonomy and its mapping to the CLI exit-code
//! contract.
//!
//! Every component returns typed errors; this module is the single place
//! where driver faults are classified into the user-facing categories. The
//! first error on any path is preserved; cleanup failures are logged by the
//! cleanup code and never override it.

use hop_db::DbError;
use hop_git::GitError;
use hop_git::LockError;
use hop_protocol::{PatchId, ProtocolError, Version};
use hop_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Workflow result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type for external collaborator seams.
pub type CollabError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error, one variant per exit-code class.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// The checkout or the request is not in a state the operation accepts.
#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("must be on branch '{expected}' (currently on '{actual}')")]
    WrongBranch { expected: String, actual: String },

    #[error("worktree has uncommitted changes; commit or stash them first")]
    DirtyWorktree,

    #[error("branch '{branch}' is not synced with origin ({state}); pull or push first")]
    NotSynced { branch: String, state: String },

    #[error("no git remote configured; set git_origin in .hop/config")]
    NoRemote,

    #[error("invalid patch id '{0}'")]
    InvalidPatchId(String),

    #[error("patch '{0}' already exists")]
    PatchExists(PatchId),

    #[error("patch '{0}' does not exist")]
    PatchMissing(PatchId),

    #[error("patch '{0}' has no executable files")]
    PatchEmpty(PatchId),

    #[error("patch '{0}' is already staged")]
    AlreadyStaged(PatchId),

    #[error("no development manifest for version {0}")]
    UnknownVersion(Version),

    #[error("patch '{0}' is not registered in any development manifest")]
    UnregisteredPatch(PatchId),

    #[error("release {0} already exists")]
    ReleaseExists(Version),

    #[error("no production schema snapshot (model/schema.sql); initialize the project first")]
    MissingSchema(PathBuf),

    #[error("nothing to promote: no staged patches in any development release")]
    NothingToPromote,

    #[error("no production tag 'release-{0}' to reopen")]
    NoSuchRelease(Version),

    #[error("operation '{operation}' is not available in context {context}")]
    NotAllowed { operation: String, context: String },

    #[error("{0}")]
    Manifest(String),
}

/// Remote coordination lost a race or could not reach the remote.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("patch id '{id}' is already reserved by another process")]
    ReservedElsewhere { id: PatchId },

    #[error("scope is locked by {tag} (age: {age_minutes} min); retry later")]
    Busy { tag: String, age_minutes: i64 },

    #[error("push rejected by remote: {0}")]
    PushRejected(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("branch '{branch}' has diverged from origin; resolve manually")]
    Diverged { branch: String },
}

/// The validation gate refused the work.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("applying patch '{patch}' failed at {file} ({stage}): {detail}")]
    ApplyFailed { patch: PatchId, file: PathBuf, stage: &'static str, detail: String },

    #[error(
        "patch is not idempotent with the declared state; changed after reapply: {}",
        paths.join(", ")
    )]
    IdempotencyViolation { paths: Vec<String> },

    #[error("test suite failed (exit {exit_code}):\n{tail}")]
    TestsFailed { exit_code: i32, tail: String },

    #[error("merging '{branch}' produced conflicts")]
    MergeConflict { branch: String },
}

/// The environment (database, permissions) is not usable.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("database unreachable: {0}")]
    DbUnreachable(String),

    #[error("database authentication failed: {0}")]
    AuthFailed(String),

    #[error("database permission denied: {0}")]
    PermissionDenied(String),
}

/// A release-sequencing invariant would be broken.
#[derive(Error, Debug)]
pub enum InvariantError {
    #[error("cannot promote {version}: {must_first} must reach production first")]
    SequentialityViolated { version: Version, must_first: Version },

    #[error("release {version} has an active RC; promote it to production before starting another")]
    ActiveRCExists { version: Version },

    #[error("unexpected release phase: {0}")]
    UnknownPhase(String),
}

impl Error {
    /// The CLI collaborator exit-code contract.
    ///
    /// 0 success, 1 precondition, 2 coordination, 3 validation,
    /// 4 environment, 5 internal. Invariant violations are user-workflow
    /// errors and map to the precondition class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Precondition(_) | Error::Invariant(_) => 1,
            Error::Coordination(_) => 2,
            Error::Validation(_) => 3,
            Error::Environment(_) => 4,
            Error::Internal(_) => 5,
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Error::Internal(detail.into())
    }
}

impl From<GitError> for Error {
    fn from(e: GitError) -> Self {
        match e {
            GitError::DirtyWorktree => PreconditionError::DirtyWorktree.into(),
            GitError::NotOnBranch { expected, actual } => {
                PreconditionError::WrongBranch { expected, actual }.into()
            }
            GitError::PushRejected(detail) => CoordinationError::PushRejected(detail).into(),
            GitError::RemoteUnavailable(detail) => {
                CoordinationError::RemoteUnavailable(detail).into()
            }
            GitError::MergeConflict { branch } => ValidationError::MergeConflict { branch }.into(),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<LockError> for Error {
    fn from(e: LockError) -> Self {
        match e {
            LockError::ReservedElsewhere { id } => {
                CoordinationError::ReservedElsewhere { id }.into()
            }
            LockError::Busy { tag, age_minutes, .. } => {
                CoordinationError::Busy { tag, age_minutes }.into()
            }
            LockError::Git(e) => e.into(),
        }
    }
}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Unreachable(detail) => EnvironmentError::DbUnreachable(detail).into(),
            DbError::AuthFailed(detail) => EnvironmentError::AuthFailed(detail).into(),
            DbError::PermissionDenied(detail) => EnvironmentError::PermissionDenied(detail).into(),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingManifest(v) => PreconditionError::UnknownVersion(v).into(),
            StoreError::DuplicatePatch(id) | StoreError::PatchExists(id) => {
                PreconditionError::PatchExists(id).into()
            }
            StoreError::UnknownPatch(id) | StoreError::PatchMissing(id) => {
                PreconditionError::PatchMissing(id).into()
            }
            StoreError::AlreadyStaged(id) => PreconditionError::AlreadyStaged(id).into(),
            StoreError::NoExecutableFiles(id) => PreconditionError::PatchEmpty(id).into(),
            StoreError::UnknownAnchor(id) => {
                PreconditionError::Manifest(format!("anchor patch '{id}' not in manifest")).into()
            }
            StoreError::InvalidManifest { path, detail } => PreconditionError::Manifest(format!(
                "malformed manifest {}: {detail}",
                path.display()
            ))
            .into(),
            StoreError::InvalidSnapshot { path, detail } => PreconditionError::Manifest(format!(
                "malformed snapshot {}: {detail}",
                path.display()
            ))
            .into(),
            StoreError::Io(e) => Error::Internal(e.to_string()),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidPatchId(raw) => PreconditionError::InvalidPatchId(raw).into(),
            other => Error::Internal(other.to_string()),
        }
    }
}
