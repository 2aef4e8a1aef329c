//! Sequential-promotion enforcement and the single-active-RC rule across
//! several releases in flight.

mod support;

use hop_git::GitDriver;
use hop_protocol::Level;
use std::path::Path;
use support::{orch, FakeDb, TestWorld};

/// Build a release, add one patch, merge it, leave the checkout on ho-prod.
fn release_with_staged_patch(root: &Path, db: &FakeDb, level: Level, patch: &str) {
    let git = GitDriver::open(root).unwrap();
    git.checkout("ho-prod").unwrap();
    orch(root, db).new_release(level).unwrap();
    stage_patch(root, db, patch);
}

fn stage_patch(root: &Path, db: &FakeDb, patch: &str) {
    let git = GitDriver::open(root).unwrap();
    orch(root, db).create_patch(patch).unwrap();
    let sql = format!("Patches/{patch}/01.sql");
    std::fs::write(root.join(&sql), "SELECT 1;\n").unwrap();
    git.commit(&[Path::new(&sql)], "Patch body").unwrap();
    orch(root, db).merge_patch().unwrap();
    git.checkout("ho-prod").unwrap();
}

#[test]
fn promotion_is_sequential_and_single_rc() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("0.1.0")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    // Two releases in flight: 0.1.1 has only a candidate, 0.2.0 has
    // staged work.
    orch(&root, &db).new_release(Level::Patch).unwrap();
    orch(&root, &db).create_patch("1-a").unwrap();
    std::fs::write(root.join("Patches/1-a/01.sql"), "SELECT 1;\n").unwrap();
    git.commit(&[Path::new("Patches/1-a/01.sql")], "Candidate body").unwrap();
    git.push().unwrap();

    release_with_staged_patch(&root, &db, Level::Minor, "2-b");

    // 0.2.0 is staged but 0.1.1 is not in production yet.
    let err = orch(&root, &db).promote_rc().unwrap_err();
    assert_eq!(err.exit_code(), 1, "{err}");
    assert!(err.to_string().contains("0.1.1"), "{err}");

    // Stage 0.1.1's candidate; now it is the promotable release.
    git.checkout("ho-patch/1-a").unwrap();
    orch(&root, &db).merge_patch().unwrap();
    git.checkout("ho-prod").unwrap();

    let report = orch(&root, &db).promote_rc().unwrap();
    assert!(report.identifiers.contains(&"0.1.1".to_string()), "{report:?}");
    assert!(root.join(".hop/releases/0.1.1-rc1.txt").is_file());

    // With 0.1.1's RC active, 0.2.0 may not start one.
    let err = orch(&root, &db).promote_rc().unwrap_err();
    assert_eq!(err.exit_code(), 1, "{err}");
    assert!(err.to_string().contains("active RC"), "{err}");

    // Production promotion of 0.1.1 unblocks 0.2.0.
    orch(&root, &db).promote_prod().unwrap();
    assert!(root.join(".hop/releases/0.1.1.txt").is_file());

    let report = orch(&root, &db).promote_rc().unwrap();
    assert!(report.identifiers.contains(&"0.2.0".to_string()), "{report:?}");
    let rc = std::fs::read_to_string(root.join(".hop/releases/0.2.0-rc1.txt")).unwrap();
    assert!(rc.contains("2-b"), "{rc}");
}

#[test]
fn rc_notifies_surviving_patch_branches() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("0.1.0")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    orch(&root, &db).new_release(Level::Patch).unwrap();

    // One patch stays a candidate, another gets staged.
    orch(&root, &db).create_patch("5-keeper").unwrap();
    std::fs::write(root.join("Patches/5-keeper/01.sql"), "SELECT 5;\n").unwrap();
    git.commit(&[Path::new("Patches/5-keeper/01.sql")], "Keeper body").unwrap();
    git.push().unwrap();

    git.checkout("ho-release/0.1.1").unwrap();
    stage_patch(&root, &db, "6-staged");

    let report = orch(&root, &db).promote_rc().unwrap();
    assert!(
        report.notifications_emitted.iter().any(|n| n.contains("5-keeper")),
        "{report:?}"
    );

    // The notification landed on the surviving branch as an empty commit.
    git.fetch().unwrap();
    let messages = support::git_log_messages(&root, "origin/ho-patch/5-keeper", 2);
    assert!(
        messages.iter().any(|m| m.starts_with("[notify] promote_rc")),
        "{messages:?}"
    );
    // The staged branch is gone, the candidate survives.
    assert!(!git.remote_branch_exists("ho-patch/6-staged").unwrap());
    assert!(git.remote_branch_exists("ho-patch/5-keeper").unwrap());
}

#[test]
fn status_reports_the_workflow_state() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("1.3.3")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    orch(&root, &db).new_release(Level::Patch).unwrap();
    orch(&root, &db).create_patch("42-login").unwrap();

    let status = orch(&root, &db).status().unwrap();
    assert_eq!(status.branch, "ho-patch/42-login");
    assert_eq!(status.production_version, "1.3.3");
    assert_eq!(status.active_rc, None);
    // The patch branch's own manifest copy predates registration; status
    // reads the worktree, which still knows the development release.
    assert_eq!(status.developments.len(), 1);
    assert_eq!(status.developments[0].version, "1.3.4");

    git.checkout("ho-release/1.3.4").unwrap();
    let status = orch(&root, &db).status().unwrap();
    assert_eq!(status.developments[0].patches.len(), 1);
    assert_eq!(status.developments[0].patches[0].id, "42-login");
    assert_eq!(status.developments[0].patches[0].state, "candidate");
}
