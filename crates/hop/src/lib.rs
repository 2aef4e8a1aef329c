//! Git-centric release management for PostgreSQL schema patches.
//!
//! A Git repository is the coordination substrate: per-release manifests
//! order the patches, tags implement distributed reservations and locks,
//! ephemeral validation branches gate every merge, and promotions move
//! releases through candidate, production and hotfix phases sequentially.
//!
//! The [`Orchestrator`] is the stable API surface; the CLI that drives it
//! is an external collaborator, as are the schema introspection, code
//! generation, test gate and backup store seams in [`collab`].

pub mod collab;
pub mod context;
pub mod deploy;
pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod patch;
pub mod release;
pub mod repo;
pub mod report;
mod scan;

pub use context::{Context, Operation};
pub use error::{
    CollabError, CoordinationError, EnvironmentError, Error, InvariantError,
    PreconditionError, Result, ValidationError,
};
pub use orchestrator::{Orchestrator, StatusReport};
pub use repo::Repo;
pub use report::OperationReport;
