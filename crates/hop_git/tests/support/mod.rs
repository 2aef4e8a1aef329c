//! Throwaway repositories for driver tests: a bare origin plus one or more
//! working clones, all inside a TempDir.

use anyhow::Result;
use hop_git::GitDriver;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub struct TestRemote {
    pub tmp: TempDir,
    pub origin: PathBuf,
}

impl TestRemote {
    pub fn new() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let origin = tmp.path().join("origin.git");
        run(tmp.path(), &["init", "--bare", "--initial-branch", "ho-prod", "origin.git"])?;
        Ok(Self { tmp, origin })
    }

    /// Initialize the first working copy with one commit pushed to origin.
    pub fn seed(&self, name: &str) -> Result<GitDriver> {
        let root = self.tmp.path().join(name);
        let git = GitDriver::init(&root, "ho-prod")?;
        git.set_identity("hop test", "hop@test.invalid")?;
        git.set_origin(self.origin.to_str().unwrap())?;
        std::fs::write(root.join("README.md"), "seed\n")?;
        git.commit(&[Path::new("README.md")], "Initial commit")?;
        git.push_branch("ho-prod", true)?;
        Ok(git)
    }

    /// Clone an additional working copy of the same origin.
    pub fn clone(&self, name: &str) -> Result<GitDriver> {
        let root = self.tmp.path().join(name);
        run(
            self.tmp.path(),
            &["clone", self.origin.to_str().unwrap(), root.to_str().unwrap()],
        )?;
        let git = GitDriver::open(&root)?;
        git.set_identity("hop test", "hop@test.invalid")?;
        Ok(git)
    }
}

fn run(cwd: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git").args(args).current_dir(cwd).output()?;
    anyhow::ensure!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}
