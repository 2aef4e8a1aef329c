//! Full release cycle over a throwaway origin: release creation, patch
//! creation with tag reservation, validation-gated merge, RC and
//! production promotion, hotfix re-entry.

mod support;

use hop_git::GitDriver;
use hop_protocol::Level;
use std::path::Path;
use support::{git_log_messages, orch, FakeDb, TestWorld};

#[test]
fn single_patch_release_cycle() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("1.3.3")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    // -- create the release -------------------------------------------------
    let report = orch(&root, &db).new_release(Level::Patch).unwrap();
    assert_eq!(report.identifiers, vec!["1.3.4", "ho-release/1.3.4"]);
    assert_eq!(git.current_branch().unwrap(), "ho-release/1.3.4");
    assert!(root.join(".hop/releases/1.3.4-patches.toml").is_file());
    assert!(git.remote_branch_exists("ho-release/1.3.4").unwrap());

    // -- create the patch ---------------------------------------------------
    let report = orch(&root, &db).create_patch("42-login").unwrap();
    assert_eq!(report.status, "ok");
    assert_eq!(report.tags_pushed, vec!["patch-id/42-login"]);
    assert_eq!(git.current_branch().unwrap(), "ho-patch/42-login");
    assert!(root.join("Patches/42-login/README.md").is_file());
    assert!(git.remote_tag_exists("patch-id/42-login").unwrap());
    assert!(git.remote_branch_exists("ho-patch/42-login").unwrap());

    // The candidate landed on the release branch.
    let manifest = git
        .show(
            "origin/ho-release/1.3.4",
            Path::new(".hop/releases/1.3.4-patches.toml"),
        )
        .unwrap()
        .expect("manifest on release branch");
    assert!(manifest.contains("\"42-login\" = \"candidate\""), "{manifest}");

    // -- author and apply the patch ----------------------------------------
    std::fs::write(
        root.join("Patches/42-login/01_login.sql"),
        "CREATE TABLE t(id int);\n",
    )
    .unwrap();
    git.commit(&[Path::new("Patches/42-login/01_login.sql")], "Add login table").unwrap();

    orch(&root, &db).apply_patch().unwrap();
    let calls = db.calls();
    assert_eq!(calls[0], "reset:schema.sql");
    assert!(calls.contains(&"sql:01_login.sql".to_string()), "{calls:?}");

    // -- merge behind the validation gate ------------------------------------
    let report = orch(&root, &db).merge_patch().unwrap();
    assert!(report.lock_tag.as_deref().unwrap().starts_with("lock-ho-release-1.3.4-"));
    assert!(report.branches_deleted.iter().any(|b| b == "ho-patch/42-login"));

    assert!(!git.branch_exists("ho-patch/42-login").unwrap());
    assert!(!git.remote_branch_exists("ho-patch/42-login").unwrap());
    assert!(!git.branch_exists("ho-validate/42-login").unwrap());
    assert!(git.remote_tag_exists("patch-id/42-login").unwrap());
    // No lock tags survive the merge.
    assert!(git.list_tags(Some("lock-*")).unwrap().is_empty());

    let manifest = git
        .show(
            "origin/ho-release/1.3.4",
            Path::new(".hop/releases/1.3.4-patches.toml"),
        )
        .unwrap()
        .unwrap();
    assert!(manifest.contains("\"42-login\" = \"staged\""), "{manifest}");

    let log = git_log_messages(&root, "ho-release/1.3.4", 5);
    assert!(log.iter().any(|m| m.contains("Closes #42")), "{log:?}");
    assert!(log.iter().any(|m| m.starts_with("[notify] merge_patch")), "{log:?}");

    // -- promote to RC -------------------------------------------------------
    git.checkout("ho-prod").unwrap();
    let report = orch(&root, &db).promote_rc().unwrap();
    assert!(report.tags_pushed.contains(&"release-rc-1.3.4-1".to_string()));

    let rc = std::fs::read_to_string(root.join(".hop/releases/1.3.4-rc1.txt")).unwrap();
    assert_eq!(rc, "# Release 1.3.4-rc1\n42-login\n");
    assert!(git.remote_tag_exists("release-rc-1.3.4-1").unwrap());
    // The code payload of the staged patch is on the trunk.
    assert!(root.join("Patches/42-login/01_login.sql").is_file());
    // Staged rows left the manifest; the candidate section is empty now.
    let manifest =
        std::fs::read_to_string(root.join(".hop/releases/1.3.4-patches.toml")).unwrap();
    assert!(!manifest.contains("42-login"), "{manifest}");

    // -- promote to production ------------------------------------------------
    db.log.borrow_mut().calls.clear();
    let report = orch(&root, &db).promote_prod().unwrap();
    assert!(report.tags_pushed.contains(&"release-1.3.4".to_string()));

    assert!(root.join(".hop/releases/1.3.4.txt").is_file());
    assert!(!root.join(".hop/releases/1.3.4-rc1.txt").exists());
    assert!(!root.join(".hop/releases/1.3.4-patches.toml").exists());
    let target = std::fs::read_link(root.join(".hop/model/schema.sql")).unwrap();
    assert_eq!(target, std::path::PathBuf::from("schema-1.3.4.sql"));
    assert!(root.join(".hop/model/schema-1.3.4.sql").is_file());
    assert!(root.join(".hop/model/metadata-1.3.4.sql").is_file());
    assert!(git.remote_tag_exists("release-1.3.4").unwrap());
    assert!(!git.remote_branch_exists("ho-release/1.3.4").unwrap());

    let calls = db.calls();
    assert!(calls.contains(&"release-row:1.3.4:production".to_string()), "{calls:?}");
    assert!(calls.contains(&"dump-schema:1.3.4".to_string()), "{calls:?}");

    // The replay reset to the previous production schema first.
    assert_eq!(calls[0], "reset:schema.sql");
    assert!(git.is_clean().unwrap());
}

#[test]
fn hotfix_reenters_and_promotes() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("1.3.4")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    // A newer release is under development and must stay untouched.
    orch(&root, &db).new_release(Level::Minor).unwrap();
    git.checkout("ho-prod").unwrap();
    let v140_head = git.rev_parse("origin/ho-release/1.4.0").unwrap();

    // Reopen 1.3.4 from its production tag.
    let report = orch(&root, &db).hotfix_open("1.3.4".parse().unwrap()).unwrap();
    assert_eq!(report.identifiers, vec!["1.3.4", "ho-release/1.3.4"]);
    assert_eq!(git.current_branch().unwrap(), "ho-release/1.3.4");
    assert!(root.join(".hop/releases/1.3.4-hotfix-patches.toml").is_file());

    // Patch the hotfix line.
    orch(&root, &db).create_patch("9-security").unwrap();
    std::fs::write(
        root.join("Patches/9-security/01_fix.sql"),
        "ALTER TABLE t ADD COLUMN locked bool;\n",
    )
    .unwrap();
    git.commit(&[Path::new("Patches/9-security/01_fix.sql")], "Lock column").unwrap();
    orch(&root, &db).merge_patch().unwrap();

    git.checkout("ho-prod").unwrap();
    db.log.borrow_mut().calls.clear();
    let report = orch(&root, &db).promote_hotfix().unwrap();
    assert!(report.tags_pushed.contains(&"release-1.3.4-hotfix1".to_string()));

    assert!(root.join(".hop/releases/1.3.4-hotfix1.txt").is_file());
    let target = std::fs::read_link(root.join(".hop/model/schema.sql")).unwrap();
    assert_eq!(target, std::path::PathBuf::from("schema-1.3.4-hotfix1.sql"));
    assert!(git.remote_tag_exists("release-1.3.4-hotfix1").unwrap());
    assert!(!git.remote_branch_exists("ho-release/1.3.4").unwrap());

    let calls = db.calls();
    assert!(calls.contains(&"release-row:1.3.4:hotfix1".to_string()), "{calls:?}");
    assert!(calls.contains(&"sql:01_fix.sql".to_string()), "{calls:?}");

    // The open development release was not disturbed.
    assert!(git.remote_branch_exists("ho-release/1.4.0").unwrap());
    assert_eq!(git.rev_parse("origin/ho-release/1.4.0").unwrap(), v140_head);
}

#[test]
fn empty_release_promotes_with_empty_snapshot() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("0.1.0")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    orch(&root, &db).new_release(Level::Patch).unwrap();
    git.checkout("ho-prod").unwrap();

    orch(&root, &db).promote_rc().unwrap();
    let rc = std::fs::read_to_string(root.join(".hop/releases/0.1.1-rc1.txt")).unwrap();
    assert_eq!(rc, "# Release 0.1.1-rc1\n");

    orch(&root, &db).promote_prod().unwrap();
    let prod = std::fs::read_to_string(root.join(".hop/releases/0.1.1.txt")).unwrap();
    assert!(prod.lines().all(|l| l.starts_with('#')), "{prod}");
    assert!(git.remote_tag_exists("release-0.1.1").unwrap());
}

#[test]
fn numeric_only_patch_id_is_accepted() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("0.1.0")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    orch(&root, &db).new_release(Level::Patch).unwrap();
    let report = orch(&root, &db).create_patch("7").unwrap();
    assert_eq!(report.tags_pushed, vec!["patch-id/7"]);

    // A python-only patch is a valid patch.
    std::fs::write(root.join("Patches/7/01_migrate.py"), "print('ok')\n").unwrap();
    git.commit(&[Path::new("Patches/7/01_migrate.py")], "Add migration script").unwrap();
    orch(&root, &db).apply_patch().unwrap();
    assert!(db.calls().contains(&"py:01_migrate.py".to_string()));
}

#[test]
fn create_patch_twice_fails_with_patch_exists() {
    let world = TestWorld::new().unwrap();
    let root = world.seed("work", Some("0.1.0")).unwrap();
    let git = GitDriver::open(&root).unwrap();
    let db = FakeDb::new();

    orch(&root, &db).new_release(Level::Patch).unwrap();
    orch(&root, &db).create_patch("7").unwrap();

    let remote_tags_before = git.list_tags(Some("patch-id/*")).unwrap();

    git.checkout("ho-release/0.1.1").unwrap();
    let err = orch(&root, &db).create_patch("7").unwrap_err();
    assert_eq!(err.exit_code(), 1, "{err}");
    assert!(err.to_string().contains("already exists"), "{err}");
    assert_eq!(git.list_tags(Some("patch-id/*")).unwrap(), remote_tags_before);
}
