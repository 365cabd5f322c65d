use std::sync::Arc;
use std::time::Duration;

use agent_conductor::coordination::repo_lock::RepoLockManager;
use agent_conductor::models::lock::{LockOutcome, LockRequest};
use agent_conductor::persistence::db;
use chrono::{Duration as ChronoDuration, Utc};

async fn manager() -> RepoLockManager {
    let pool = db::connect_memory().await.unwrap();
    RepoLockManager::new(Arc::new(pool), Duration::from_secs(1800))
}

fn request(execution_id: &str, ttl_secs: u64) -> LockRequest {
    LockRequest {
        repo: "org/repoA".into(),
        execution_id: execution_id.into(),
        schedule_id: "nightly".into(),
        action_type: "review".into(),
        ttl: Duration::from_secs(ttl_secs),
    }
}

#[tokio::test]
async fn held_lock_denies_with_holder() {
    let locks = manager().await;
    assert!(locks
        .try_acquire("org/repoA", "exec-1", "nightly", "review", None)
        .await
        .unwrap()
        .is_granted());

    let denied = locks
        .try_acquire("org/repoA", "exec-2", "on-push", "review", None)
        .await
        .unwrap();
    let LockOutcome::Denied { holder } = denied else {
        panic!("expected denial");
    };
    let holder = holder.expect("holder readable");
    assert_eq!(holder.execution_id, "exec-1");
    assert_eq!(holder.schedule_id, "nightly");
}

#[tokio::test]
async fn expired_lock_is_taken_over() {
    let locks = manager().await;
    let t0 = Utc::now();
    assert!(locks
        .try_acquire_at(&request("exec-1", 60), t0)
        .await
        .unwrap()
        .is_granted());

    let before = locks
        .try_acquire_at(&request("exec-2", 60), t0 + ChronoDuration::seconds(59))
        .await
        .unwrap();
    assert!(!before.is_granted());

    let after = locks
        .try_acquire_at(&request("exec-2", 60), t0 + ChronoDuration::seconds(61))
        .await
        .unwrap();
    let LockOutcome::Granted(lock) = after else {
        panic!("expired lock should be granted");
    };
    assert_eq!(lock.execution_id, "exec-2");
}

#[tokio::test]
async fn extend_only_applies_to_live_holder() {
    let locks = manager().await;
    let t0 = Utc::now();
    locks
        .try_acquire_at(&request("exec-1", 60), t0)
        .await
        .unwrap();

    let later = t0 + ChronoDuration::seconds(50);
    assert!(locks
        .extend_at("org/repoA", "exec-1", Duration::from_secs(60), later)
        .await
        .unwrap());
    assert!(!locks
        .extend_at("org/repoA", "exec-2", Duration::from_secs(60), later)
        .await
        .unwrap());

    // Extended to t0+110s, so still held at t0+100s.
    assert!(!locks
        .try_acquire_at(&request("exec-2", 60), t0 + ChronoDuration::seconds(100))
        .await
        .unwrap()
        .is_granted());

    let expired = t0 + ChronoDuration::seconds(200);
    assert!(!locks
        .extend_at("org/repoA", "exec-1", Duration::from_secs(60), expired)
        .await
        .unwrap());
}

#[tokio::test]
async fn release_by_non_holder_is_a_no_op() {
    let locks = manager().await;
    locks
        .try_acquire("org/repoA", "exec-1", "nightly", "review", None)
        .await
        .unwrap();

    assert!(!locks.release("org/repoA", "exec-2").await.unwrap());
    assert_eq!(
        locks.holder("org/repoA").await.unwrap().unwrap().execution_id,
        "exec-1"
    );
    assert!(locks.release("org/repoA", "exec-1").await.unwrap());
    assert!(locks.holder("org/repoA").await.unwrap().is_none());
}

#[tokio::test]
async fn same_execution_may_reacquire() {
    let locks = manager().await;
    for _ in 0..2 {
        assert!(locks
            .try_acquire("org/repoA", "exec-1", "nightly", "review", None)
            .await
            .unwrap()
            .is_granted());
    }
}

#[tokio::test]
async fn concurrent_acquirers_get_exactly_one_grant() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::connect(dir.path().join("locks.db")).await.unwrap();
    let locks = RepoLockManager::new(Arc::new(pool), Duration::from_secs(1800));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let locks = locks.clone();
        tasks.push(tokio::spawn(async move {
            locks
                .try_acquire("org/repoA", &format!("exec-{i}"), "nightly", "review", None)
                .await
                .unwrap()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().is_granted() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
}
