//! Layout migration: pre-0.17.1 repositories move `releases/` and
//! `model/` under `.hop/`, exactly once.

mod support;

use hop_git::GitDriver;
use hop_protocol::RepoConfig;
use hop_protocol::Version;
use std::path::PathBuf;
use support::{git_log_messages, orch, FakeDb, TestWorld};

/// An old-layout repository: config under `.hop/`, state at the root.
fn seed_old_layout(world: &TestWorld) -> PathBuf {
    let root = world.tmp.path().join("legacy");
    let git = GitDriver::init(&root, "ho-prod").unwrap();
    git.set_identity("hop test", "hop@test.invalid").unwrap();
    git.set_origin(world.origin.to_str().unwrap()).unwrap();

    let mut config = RepoConfig::new("blog");
    config.git_origin = world.origin.to_string_lossy().into_owned();
    config.devel = true;
    config.hop_version = "0.16.0".to_string();
    config.save(&root.join(".hop/config")).unwrap();

    std::fs::create_dir_all(root.join("releases")).unwrap();
    std::fs::create_dir_all(root.join("model")).unwrap();
    std::fs::write(root.join("releases/0.1.0.txt"), "# Release 0.1.0\n").unwrap();
    std::fs::write(root.join("model/schema-0.1.0.sql"), "-- schema\n").unwrap();
    std::os::unix::fs::symlink("schema-0.1.0.sql", root.join("model/schema.sql")).unwrap();

    support::run_git(&root, &["add", "-A"]).unwrap();
    support::run_git(&root, &["commit", "-m", "Legacy layout"]).unwrap();
    git.push_branch("ho-prod", true).unwrap();
    root
}

#[test]
fn relocates_layout_once() {
    let world = TestWorld::new().unwrap();
    let root = seed_old_layout(&world);
    let db = FakeDb::new();

    let mut o = orch(&root, &db);
    let outcomes = o.migrate().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, Version::new(0, 17, 1));
    assert_eq!(outcomes[0].1, hop::migrate::MigrationOutcome::Migrated);

    // The layout moved and history recorded it.
    assert!(root.join(".hop/releases/0.1.0.txt").is_file());
    assert!(root.join(".hop/model/schema-0.1.0.sql").is_file());
    assert!(!root.join("releases").exists());
    assert!(!root.join("model").exists());
    let gitignore = std::fs::read_to_string(root.join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".hop/backups/"), "{gitignore}");

    let messages = git_log_messages(&root, "ho-prod", 2);
    assert!(
        messages.iter().any(|m| m.starts_with("[migrate 0.17.1]")),
        "{messages:?}"
    );

    // The recorded tool version advanced, so a second run is a no-op.
    let config = RepoConfig::load(&root.join(".hop/config")).unwrap();
    assert_eq!(config.hop_version, "0.17.1");
    let mut o = orch(&root, &db);
    assert!(o.migrate().unwrap().is_empty());

    let git = GitDriver::open(&root).unwrap();
    assert!(git.is_clean().unwrap());
}

#[test]
fn current_repositories_are_untouched() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("1.0.0")).unwrap();
    let db = FakeDb::new();

    let head_before = GitDriver::open(&root).unwrap().head_commit().unwrap();
    let mut o = orch(&root, &db);
    assert!(o.migrate().unwrap().is_empty());
    assert_eq!(GitDriver::open(&root).unwrap().head_commit().unwrap(), head_before);
}
