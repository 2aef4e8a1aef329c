mod support;

use chrono::Utc;
use hop_git::{LockError, LockService};
use hop_protocol::refs;
use hop_protocol::{LockScope, PatchId, Version};
use support::TestRemote;

fn pid(s: &str) -> PatchId {
    PatchId::parse(s).unwrap()
}

#[test]
fn reserve_patch_succeeds_once() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();
    let two = remote.clone("two").unwrap();

    let locks_one = LockService::new(&one);
    let tag = locks_one.reserve_patch(&pid("99-x"), "HEAD").unwrap();
    assert_eq!(tag, "patch-id/99-x");

    // The second process observes the reservation after fetch and loses.
    let locks_two = LockService::new(&two);
    let err = locks_two.reserve_patch(&pid("99-x"), "HEAD").unwrap_err();
    assert!(matches!(err, LockError::ReservedElsewhere { .. }), "{err}");
    // The winner's reservation is what the remote carries.
    assert!(two.remote_tag_exists("patch-id/99-x").unwrap());
}

#[test]
fn lock_excludes_second_acquirer() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();
    let two = remote.clone("two").unwrap();

    let locks_one = LockService::new(&one);
    let guard = locks_one.acquire(LockScope::Prod).unwrap();
    assert!(guard.tag().starts_with("lock-ho-prod-"));

    let locks_two = LockService::new(&two);
    let err = locks_two.acquire(LockScope::Prod).unwrap_err();
    assert!(matches!(err, LockError::Busy { .. }), "{err}");

    // Release makes the scope available again.
    guard.release();
    let guard2 = locks_two.acquire(LockScope::Prod).unwrap();
    guard2.release();
}

#[test]
fn release_scopes_are_independent() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();
    let two = remote.clone("two").unwrap();

    let v1: Version = "1.0.0".parse().unwrap();
    let v2: Version = "1.1.0".parse().unwrap();

    let locks_one = LockService::new(&one);
    let locks_two = LockService::new(&two);

    let g1 = locks_one.acquire(LockScope::Release(v1)).unwrap();
    // A different release scope is not blocked.
    let g2 = locks_two.acquire(LockScope::Release(v2)).unwrap();
    g1.release();
    g2.release();
}

#[test]
fn stale_lock_is_swept() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();
    let two = remote.clone("two").unwrap();

    // Plant a lock tag whose embedded timestamp is an hour old.
    let stale_ms = Utc::now().timestamp_millis() - 60 * 60 * 1000;
    let stale_tag = refs::lock_tag(LockScope::Prod, stale_ms);
    one.create_tag(&stale_tag, "HEAD", Some("dead process")).unwrap();
    assert_eq!(one.push_tag(&stale_tag).unwrap(), hop_git::PushOutcome::Accepted);

    // Another caller reclaims the scope.
    let locks_two = LockService::new(&two);
    let guard = locks_two.acquire(LockScope::Prod).unwrap();
    assert!(!two.remote_tag_exists(&stale_tag).unwrap());
    guard.release();
}

#[test]
fn fresh_lock_is_respected() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();
    let two = remote.clone("two").unwrap();

    // A lock created moments ago must not be swept.
    let locks_one = LockService::new(&one);
    let guard = locks_one.acquire(LockScope::Prod).unwrap();

    let locks_two = LockService::new(&two);
    let err = locks_two.acquire(LockScope::Prod).err().expect("second acquire must fail");
    match err {
        LockError::Busy { tag, age_minutes, .. } => {
            assert_eq!(tag, guard.tag());
            assert!(age_minutes <= 1);
        }
        other => panic!("expected Busy, got {other}"),
    }
    guard.release();
}

#[test]
fn guard_drop_releases_best_effort() {
    let remote = TestRemote::new().unwrap();
    let one = remote.seed("one").unwrap();

    let tag = {
        let locks = LockService::new(&one);
        let guard = locks.acquire(LockScope::Prod).unwrap();
        guard.tag().to_string()
        // guard dropped here
    };
    assert!(!one.remote_tag_exists(&tag).unwrap());
    assert!(!one.tag_exists(&tag).unwrap());
}
