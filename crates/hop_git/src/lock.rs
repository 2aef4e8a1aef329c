//! Distributed coordination over git tags.
//!
//! Two primitives, both built on the atomic tag push:
//!
//! * **Patch id reservation** (`patch-id/<id>`): permanent, first push wins.
//! * **Mutual-exclusion lock** (`lock-<scope>-<unix-ms>`): released after
//!   the critical section; any lock older than the staleness horizon may be
//!   reclaimed by any caller.

use crate::driver::GitDriver;
use crate::error::{GitError, PushOutcome};
use chrono::Utc;
use hop_protocol::refs;
use hop_protocol::{LockScope, PatchId};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Locks older than this may be swept by any caller.
pub const STALE_AFTER_MINUTES: i64 = 30;

/// Coordination failures, distinct from plain git faults.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("patch id '{id}' is already reserved on the remote")]
    ReservedElsewhere { id: PatchId },

    #[error("scope '{scope}' is locked by {tag} (age: {age_minutes} min)")]
    Busy { scope: String, tag: String, age_minutes: i64 },

    #[error(transparent)]
    Git(#[from] GitError),
}

pub type LockResult<T> = std::result::Result<T, LockError>;

/// Tag-based reservation and locking over a [`GitDriver`].
pub struct LockService<'a> {
    git: &'a GitDriver,
}

impl<'a> LockService<'a> {
    pub fn new(git: &'a GitDriver) -> Self {
        Self { git }
    }

    /// Reserve a patch identifier globally by pushing `patch-id/<id>` at
    /// `at_ref`. Success is the point of no return for patch creation: the
    /// reservation is permanent.
    pub fn reserve_patch(&self, id: &PatchId, at_ref: &str) -> LockResult<String> {
        let tag = refs::reservation_tag(id);
        self.git.fetch()?;
        if self.git.remote_tag_exists(&tag)? {
            return Err(LockError::ReservedElsewhere { id: id.clone() });
        }
        self.git.create_tag(&tag, at_ref, Some(&format!("Reserve patch id {id}")))?;
        match self.git.push_tag(&tag)? {
            PushOutcome::Accepted => {
                info!(%tag, "patch id reserved");
                Ok(tag)
            }
            PushOutcome::Rejected => {
                // A concurrent creator won the push race.
                if let Err(e) = self.git.delete_local_tag(&tag) {
                    warn!(%tag, "failed to drop local reservation tag after losing race: {e}");
                }
                Err(LockError::ReservedElsewhere { id: id.clone() })
            }
        }
    }

    /// Acquire the mutual-exclusion lock for a scope.
    ///
    /// Stale locks (older than [`STALE_AFTER_MINUTES`]) are swept best-effort
    /// before acquisition. The returned guard releases the lock on all exit
    /// paths; prefer calling [`LockGuard::release`] explicitly so failures
    /// are observable.
    pub fn acquire(&self, scope: LockScope) -> LockResult<LockGuard<'a>> {
        self.git.fetch()?;
        let pattern = refs::lock_tag_pattern(scope);
        let now_ms = Utc::now().timestamp_millis();

        for tag in self.git.list_tags(Some(&pattern))? {
            let Some(ts) = refs::parse_lock_tag_timestamp(&tag) else {
                warn!(%tag, "ignoring lock tag without a parsable timestamp");
                continue;
            };
            let age_minutes = (now_ms - ts) / 60_000;
            if age_minutes > STALE_AFTER_MINUTES {
                info!(%tag, age_minutes, "sweeping stale lock");
                if let Err(e) = self.git.delete_tag(&tag) {
                    warn!(%tag, "failed to sweep stale lock: {e}");
                }
            } else {
                return Err(LockError::Busy {
                    scope: scope.fragment(),
                    tag,
                    age_minutes,
                });
            }
        }

        let tag = refs::lock_tag(scope, now_ms);
        self.git.create_tag(&tag, "HEAD", Some(&format!("Lock {}", scope.fragment())))?;
        match self.git.push_tag(&tag)? {
            PushOutcome::Accepted => {
                debug!(%tag, "lock acquired");
                Ok(LockGuard { git: self.git, tag, released: false })
            }
            PushOutcome::Rejected => {
                if let Err(e) = self.git.delete_local_tag(&tag) {
                    warn!(%tag, "failed to drop local lock tag after losing race: {e}");
                }
                Err(LockError::Busy {
                    scope: scope.fragment(),
                    tag: "concurrent acquisition".to_string(),
                    age_minutes: 0,
                })
            }
        }
    }
}

/// A held scope lock. Dropping the guard releases the lock best-effort;
/// remote deletion failures are logged and never fatal.
#[derive(Debug)]
pub struct LockGuard<'a> {
    git: &'a GitDriver,
    tag: String,
    released: bool,
}

impl LockGuard<'_> {
    /// The lock tag name, surfaced in operation reports.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Release the lock now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.git.delete_remote_tag(&self.tag) {
            warn!(tag = %self.tag, "failed to delete remote lock tag: {e}");
        }
        if let Err(e) = self.git.delete_local_tag(&self.tag) {
            warn!(tag = %self.tag, "failed to delete local lock tag: {e}");
        }
        debug!(tag = %self.tag, "lock released");
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
