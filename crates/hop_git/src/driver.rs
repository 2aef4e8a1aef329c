//! Typed operations over a local+remote git working copy.
//!
//! Every operation shells out to the `git` binary with explicit arguments
//! and classifies failures into [`GitError`] kinds. The tag push is the
//! atomic primitive the lock service builds on: it is either fully visible
//! on the remote or has no effect.

use crate::error::{GitError, PushOutcome, Result, SyncState};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

const ORIGIN: &str = "origin";

/// A git working copy rooted at a fixed directory.
///
/// The working copy is owned exclusively by the current process; all
/// cross-process coordination goes through the remote.
#[derive(Debug)]
pub struct GitDriver {
    root: PathBuf,
}

impl GitDriver {
    /// Open an existing working copy.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let driver = Self { root };
        let out = driver.raw(&["rev-parse", "--is-inside-work-tree"])?;
        if !out.status.success() {
            return Err(GitError::NotARepository(driver.root.clone()));
        }
        Ok(driver)
    }

    /// Initialize a fresh repository (used by project setup and tests).
    pub fn init(root: impl Into<PathBuf>, initial_branch: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let driver = Self { root };
        driver.run(&["init", "--initial-branch", initial_branch])?;
        Ok(driver)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(?args, "git");
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(GitError::Spawn)
    }

    /// Run git, return trimmed stdout on success, classified error otherwise.
    fn run(&self, args: &[&str]) -> Result<String> {
        let out = self.raw(args)?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string());
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim_end().to_string();
        Err(classify(args, &stderr))
    }

    // ---- inspection ------------------------------------------------------

    /// The checked-out branch name. Detached HEAD is reported as an error
    /// because every workflow operation requires a named branch.
    pub fn current_branch(&self) -> Result<String> {
        let name = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if name == "HEAD" {
            return Err(GitError::NotOnBranch {
                expected: "a named branch".to_string(),
                actual: "detached HEAD".to_string(),
            });
        }
        Ok(name)
    }

    /// True when there are no modified and no untracked files.
    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.status_porcelain()?.is_empty())
    }

    /// `git status --porcelain` lines.
    pub fn status_porcelain(&self) -> Result<Vec<String>> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    /// Compare a local branch with its origin counterpart.
    pub fn is_synced_with(&self, branch: &str) -> Result<SyncState> {
        let spec = format!("{branch}...{ORIGIN}/{branch}");
        let out = self.run(&["rev-list", "--left-right", "--count", &spec])?;
        let mut parts = out.split_whitespace();
        let ahead: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let behind: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(match (ahead, behind) {
            (0, 0) => SyncState::Synced,
            (_, 0) => SyncState::Ahead,
            (0, _) => SyncState::Behind,
            (_, _) => SyncState::Diverged,
        })
    }

    pub fn rev_parse(&self, refspec: &str) -> Result<String> {
        self.run(&["rev-parse", "--verify", refspec])
    }

    /// The content of a file as committed on a ref (`git show ref:path`).
    /// `Ok(None)` when the path does not exist on that ref.
    pub fn show(&self, refspec: &str, path: &Path) -> Result<Option<String>> {
        let spec = format!("{refspec}:{}", path.display());
        let out = self.raw(&["show", &spec])?;
        if out.status.success() {
            return Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned()));
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("does not exist")
            || stderr.contains("exists on disk, but not in")
            || stderr.contains("invalid object name")
        {
            return Ok(None);
        }
        Err(classify(&["show"], stderr.trim_end()))
    }

    pub fn head_commit(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let out = self.raw(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(classify(
                &["merge-base"],
                String::from_utf8_lossy(&out.stderr).trim_end(),
            )),
        }
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        let refspec = format!("refs/heads/{name}");
        let out = self.raw(&["show-ref", "--verify", "--quiet", &refspec])?;
        Ok(out.status.success())
    }

    pub fn remote_branch_exists(&self, name: &str) -> Result<bool> {
        let refspec = format!("refs/heads/{name}");
        let out = self.run(&["ls-remote", "--heads", ORIGIN, &refspec])?;
        Ok(!out.is_empty())
    }

    /// Remote branch names, optionally filtered by prefix.
    pub fn list_remote_branches(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let out = self.run(&["ls-remote", "--heads", ORIGIN])?;
        let mut names = Vec::new();
        for line in out.lines() {
            let Some(r) = line.split_whitespace().nth(1) else { continue };
            let Some(name) = r.strip_prefix("refs/heads/") else { continue };
            if prefix.map_or(true, |p| name.starts_with(p)) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    // ---- fetch / sync ----------------------------------------------------

    /// Fetch from origin with pruning of both branches and tags, so deleted
    /// lock tags disappear locally.
    pub fn fetch(&self) -> Result<()> {
        self.run(&["fetch", ORIGIN, "--prune", "--prune-tags", "--tags", "--force"])?;
        Ok(())
    }

    /// Fast-forward the current branch from origin. Refuses non-ff.
    pub fn pull_ff(&self, branch: &str) -> Result<()> {
        self.run(&["pull", "--ff-only", ORIGIN, branch])?;
        Ok(())
    }

    /// Fast-forward a branch that is not checked out. Fails when the local
    /// branch has commits origin does not have.
    pub fn fast_forward_local(&self, branch: &str) -> Result<()> {
        let refspec = format!("{branch}:{branch}");
        self.run(&["fetch", ORIGIN, &refspec])?;
        Ok(())
    }

    // ---- branches --------------------------------------------------------

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch])?;
        Ok(())
    }

    /// Create and check out a new branch starting at `from_ref`.
    pub fn checkout_new(&self, name: &str, from_ref: &str) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(GitError::BranchExists(name.to_string()));
        }
        self.run(&["checkout", "-b", name, from_ref])?;
        Ok(())
    }

    pub fn create_branch(&self, name: &str, from_ref: &str) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(GitError::BranchExists(name.to_string()));
        }
        self.run(&["branch", name, from_ref])?;
        Ok(())
    }

    pub fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        if !self.branch_exists(name)? {
            return Err(GitError::BranchMissing(name.to_string()));
        }
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name])?;
        Ok(())
    }

    pub fn delete_remote_branch(&self, name: &str) -> Result<()> {
        self.run(&["push", ORIGIN, "--delete", name])?;
        Ok(())
    }

    // ---- merge -----------------------------------------------------------

    /// No-fast-forward merge with an explicit message. Conflicts are
    /// aborted before returning [`GitError::MergeConflict`], leaving the
    /// worktree as it was.
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<()> {
        let out = self.raw(&["merge", "--no-ff", "-m", message, branch])?;
        self.check_merge(branch, out)
    }

    /// Fast-forward-only merge.
    pub fn merge_ff_only(&self, branch: &str) -> Result<()> {
        self.run(&["merge", "--ff-only", branch])?;
        Ok(())
    }

    /// Regular merge (fast-forward when possible).
    pub fn merge(&self, branch: &str, message: &str) -> Result<()> {
        let out = self.raw(&["merge", "-m", message, branch])?;
        self.check_merge(branch, out)
    }

    fn check_merge(&self, branch: &str, out: std::process::Output) -> Result<()> {
        if out.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stdout.contains("CONFLICT") || stdout.contains("Automatic merge failed") {
            if let Err(e) = self.run(&["merge", "--abort"]) {
                warn!("merge --abort failed after conflict: {e}");
            }
            return Err(GitError::MergeConflict { branch: branch.to_string() });
        }
        Err(classify(&["merge", branch], stderr.trim_end()))
    }

    // ---- tags ------------------------------------------------------------

    /// Local tag names matching an optional glob pattern.
    pub fn list_tags(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let out = match pattern {
            Some(p) => self.run(&["tag", "--list", p])?,
            None => self.run(&["tag", "--list"])?,
        };
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    pub fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_tags(Some(name))?.iter().any(|t| t == name))
    }

    pub fn remote_tag_exists(&self, name: &str) -> Result<bool> {
        let refspec = format!("refs/tags/{name}");
        let out = self.run(&["ls-remote", "--tags", ORIGIN, &refspec])?;
        Ok(!out.is_empty())
    }

    /// Create a local tag at `at_ref`; annotated when a message is given.
    pub fn create_tag(&self, name: &str, at_ref: &str, message: Option<&str>) -> Result<()> {
        if self.tag_exists(name)? {
            return Err(GitError::TagExists(name.to_string()));
        }
        match message {
            Some(m) => self.run(&["tag", "-a", name, "-m", m, at_ref])?,
            None => self.run(&["tag", name, at_ref])?,
        };
        Ok(())
    }

    /// Push one tag. A rejection means a concurrent writer already holds
    /// the name on the remote; that outcome is data, not an error.
    pub fn push_tag(&self, name: &str) -> Result<PushOutcome> {
        let refspec = format!("refs/tags/{name}");
        let out = self.raw(&["push", ORIGIN, &refspec])?;
        if out.status.success() {
            return Ok(PushOutcome::Accepted);
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("[rejected]")
            || stderr.contains("already exists")
            || stderr.contains("failed to push some refs")
        {
            return Ok(PushOutcome::Rejected);
        }
        Err(classify(&["push", "--tags"], stderr.trim_end()))
    }

    pub fn delete_local_tag(&self, name: &str) -> Result<()> {
        if !self.tag_exists(name)? {
            return Err(GitError::TagMissing(name.to_string()));
        }
        self.run(&["tag", "--delete", name])?;
        Ok(())
    }

    pub fn delete_remote_tag(&self, name: &str) -> Result<()> {
        let refspec = format!("refs/tags/{name}");
        self.run(&["push", ORIGIN, "--delete", &refspec])?;
        Ok(())
    }

    /// Delete a tag locally and on origin.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.delete_local_tag(name)?;
        self.delete_remote_tag(name)
    }

    // ---- commits / worktree ----------------------------------------------

    pub fn add(&self, paths: &[&Path]) -> Result<()> {
        let mut args = vec!["add", "--"];
        let rendered: Vec<String> =
            paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        args.extend(rendered.iter().map(|s| s.as_str()));
        self.run(&args)?;
        Ok(())
    }

    /// Stage the given paths and commit them.
    pub fn commit(&self, paths: &[&Path], message: &str) -> Result<()> {
        self.add(paths)?;
        self.run(&["commit", "-m", message])?;
        Ok(())
    }

    /// Commit everything currently staged.
    pub fn commit_staged(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message])?;
        Ok(())
    }

    pub fn commit_empty(&self, message: &str) -> Result<()> {
        self.run(&["commit", "--allow-empty", "-m", message])?;
        Ok(())
    }

    pub fn mv(&self, src: &Path, dst: &Path) -> Result<()> {
        let src = src.to_string_lossy().into_owned();
        let dst = dst.to_string_lossy().into_owned();
        self.run(&["mv", &src, &dst])?;
        Ok(())
    }

    pub fn reset_hard(&self, refspec: &str) -> Result<()> {
        self.run(&["reset", "--hard", refspec])?;
        Ok(())
    }

    /// Remove untracked files and directories.
    pub fn clean_untracked(&self) -> Result<()> {
        self.run(&["clean", "-fd"])?;
        Ok(())
    }

    // ---- push ------------------------------------------------------------

    /// Push the current branch to origin.
    pub fn push(&self) -> Result<()> {
        self.run(&["push", ORIGIN, "HEAD"])?;
        Ok(())
    }

    pub fn push_branch(&self, name: &str, set_upstream: bool) -> Result<()> {
        if set_upstream {
            self.run(&["push", "--set-upstream", ORIGIN, name])?;
        } else {
            self.run(&["push", ORIGIN, name])?;
        }
        Ok(())
    }

    /// Register the coordination remote.
    pub fn set_origin(&self, url: &str) -> Result<()> {
        let out = self.raw(&["remote", "add", ORIGIN, url])?;
        if out.status.success() {
            return Ok(());
        }
        self.run(&["remote", "set-url", ORIGIN, url])?;
        Ok(())
    }

    /// Set the commit identity for this repository (project setup, tests).
    pub fn set_identity(&self, name: &str, email: &str) -> Result<()> {
        self.run(&["config", "user.name", name])?;
        self.run(&["config", "user.email", email])?;
        Ok(())
    }
}

/// Map a failed git invocation to the most specific error kind the stderr
/// supports, falling back to `CommandFailed`.
fn classify(args: &[&str], stderr: &str) -> GitError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("could not read from remote repository")
        || lowered.contains("could not resolve host")
        || lowered.contains("connection refused")
        || lowered.contains("unable to access")
        || lowered.contains("does not appear to be a git repository")
    {
        return GitError::RemoteUnavailable(tail(stderr));
    }
    if lowered.contains("[rejected]") || lowered.contains("failed to push some refs") {
        return GitError::PushRejected(tail(stderr));
    }
    if lowered.contains("did not match any file(s) known to git")
        || lowered.contains("no such branch")
        || (args.first() == Some(&"branch") && lowered.contains("not found"))
    {
        let name = args.last().copied().unwrap_or_default();
        return GitError::BranchMissing(name.to_string());
    }
    if lowered.contains("already exists") {
        let name = args.iter().rev().nth(1).copied().unwrap_or_default();
        if args.first() == Some(&"tag") {
            return GitError::TagExists(name.to_string());
        }
        return GitError::BranchExists(name.to_string());
    }
    GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: tail(stderr),
    }
}

/// Keep the last few stderr lines; git can be chatty on failure.
fn tail(stderr: &str) -> String {
    const KEEP: usize = 5;
    let lines: Vec<&str> = stderr.lines().collect();
    if lines.len() <= KEEP {
        stderr.to_string()
    } else {
        lines[lines.len() - KEEP..].join("\n")
    }
}
