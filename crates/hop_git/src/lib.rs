//! Git driver and tag-based distributed coordination for hop.
//!
//! Higher layers never invoke `git` directly; they go through
//! [`GitDriver`] for typed operations and [`LockService`] for the
//! reservation/locking protocol.

pub mod driver;
pub mod error;
pub mod lock;

pub use driver::GitDriver;
pub use error::{GitError, PushOutcome, Result, SyncState};
pub use lock::{LockError, LockGuard, LockResult, LockService, STALE_AFTER_MINUTES};
