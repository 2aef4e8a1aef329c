//! Structured operation results handed to the CLI collaborator.

use serde::Serialize;

/// What an orchestrator operation did, in terms the CLI can render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationReport {
    /// Operation name (`create_patch`, `promote_rc`, ...).
    pub operation: String,
    /// Outcome summary, `ok` unless the operation has a richer status.
    pub status: String,
    /// Principal identifiers: patch ids, versions, snapshot files.
    pub identifiers: Vec<String>,
    /// Tags pushed to the remote during the operation.
    pub tags_pushed: Vec<String>,
    /// Branches deleted (local or remote) during the operation.
    pub branches_deleted: Vec<String>,
    /// `[notify]` commits emitted on other branches.
    pub notifications_emitted: Vec<String>,
    /// The lock tag held while the operation ran, if any.
    pub lock_tag: Option<String>,
}

impl OperationReport {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            status: "ok".to_string(),
            ..Default::default()
        }
    }

    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifiers.push(id.into());
        self
    }
}
