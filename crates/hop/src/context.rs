//! The operation-gating table: which operations are available in which
//! checkout context. Computed once at startup from the repository state.

use serde::Serialize;
use std::fmt;

/// Every operation the orchestrator exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Status,
    NewRelease,
    CreatePatch,
    ApplyPatch,
    MergePatch,
    PromoteRc,
    PromoteProd,
    HotfixOpen,
    PromoteHotfix,
    Deploy,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Status => "status",
            Operation::NewRelease => "new_release",
            Operation::CreatePatch => "create_patch",
            Operation::ApplyPatch => "apply_patch",
            Operation::MergePatch => "merge_patch",
            Operation::PromoteRc => "promote_rc",
            Operation::PromoteProd => "promote_prod",
            Operation::HotfixOpen => "hotfix_open",
            Operation::PromoteHotfix => "promote_hotfix",
            Operation::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The checkout context the tool finds itself in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    /// Not inside a hop-managed repository.
    Outside,
    /// Inside a repository with uncommitted changes.
    Dirty,
    /// Development checkout, on the production trunk.
    DevProd,
    /// Development checkout, on a release or patch branch.
    DevDev,
    /// Non-development checkout (devel = false): deployment only.
    SyncOnly,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Context::Outside => "outside",
            Context::Dirty => "dirty",
            Context::DevProd => "dev-prod",
            Context::DevDev => "dev-dev",
            Context::SyncOnly => "sync-only",
        };
        f.write_str(s)
    }
}

impl Context {
    /// The operations available in this context.
    pub fn allowed(&self) -> &'static [Operation] {
        use Operation::*;
        match self {
            Context::Outside => &[],
            Context::Dirty => &[Status],
            Context::SyncOnly => &[Status, Deploy],
            Context::DevProd => &[
                Status,
                NewRelease,
                PromoteRc,
                PromoteProd,
                HotfixOpen,
                PromoteHotfix,
                Deploy,
            ],
            Context::DevDev => &[Status, CreatePatch, ApplyPatch, MergePatch],
        }
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.allowed().contains(&op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_table_shape() {
        assert!(Context::Outside.allowed().is_empty());
        assert_eq!(Context::Dirty.allowed(), &[Operation::Status]);
        assert!(Context::SyncOnly.allows(Operation::Deploy));
        assert!(!Context::SyncOnly.allows(Operation::MergePatch));
        assert!(Context::DevProd.allows(Operation::PromoteRc));
        assert!(!Context::DevProd.allows(Operation::MergePatch));
        assert!(Context::DevDev.allows(Operation::MergePatch));
        assert!(!Context::DevDev.allows(Operation::PromoteProd));
    }

    #[test]
    fn every_context_allowing_writes_allows_status() {
        for ctx in [Context::Dirty, Context::DevProd, Context::DevDev, Context::SyncOnly] {
            assert!(ctx.allows(Operation::Status), "{ctx}");
        }
    }
}
