use std::sync::Arc;
use std::time::Duration;

use agent_conductor::coordination::repo_lock::RepoLockManager;
use agent_conductor::models::session::SessionStatus;
use agent_conductor::orchestrator::{LaunchOutcome, ScheduledLauncher, ScheduledRun};
use agent_conductor::runner::inference::InferenceResponse;

use super::test_helpers::{call, pipeline, ScriptedInference};

fn run(schedule_id: &str) -> ScheduledRun {
    ScheduledRun {
        repo: "org/repoA".into(),
        schedule_id: schedule_id.into(),
        action_type: "review".into(),
        project_id: "proj-1".into(),
        agent_id: "reviewer".into(),
        prompt: "review the latest changes".into(),
        ttl: Some(Duration::from_secs(60)),
    }
}

#[tokio::test]
async fn second_launch_is_skipped_while_first_holds_lock() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::tool_call(
        call("c1", "hang"),
    ))]));
    let p = pipeline(inference).await;
    let locks = RepoLockManager::new(Arc::clone(&p.db), Duration::from_secs(1800));
    let launcher = ScheduledLauncher::new(
        locks.clone(),
        Arc::clone(&p.manager),
        Duration::from_secs(600),
    );

    let first = launcher.launch(run("nightly")).await.unwrap();
    let LaunchOutcome::Started {
        session,
        execution_id,
        watcher,
    } = first
    else {
        panic!("first launch should start");
    };

    let second = launcher.launch(run("on-push")).await.unwrap();
    match second {
        LaunchOutcome::Skipped { held_by } => assert_eq!(held_by, Some(execution_id.clone())),
        LaunchOutcome::Started { .. } => panic!("second launch must be skipped"),
    }

    // Stopping the session lets the watcher release the lock.
    p.manager.stop_session(&session.id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher finishes after session settles")
        .unwrap();
    assert!(locks.holder("org/repoA").await.unwrap().is_none());
}

#[tokio::test]
async fn lock_is_released_when_session_finishes() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::answer(
        "No issues found.",
    ))]));
    let p = pipeline(inference).await;
    let locks = RepoLockManager::new(Arc::clone(&p.db), Duration::from_secs(1800));
    let launcher = ScheduledLauncher::new(
        locks.clone(),
        Arc::clone(&p.manager),
        Duration::from_secs(600),
    );

    let LaunchOutcome::Started {
        session, watcher, ..
    } = launcher.launch(run("nightly")).await.unwrap()
    else {
        panic!("launch should start");
    };
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();

    assert!(locks.holder("org/repoA").await.unwrap().is_none());
    let done = p.manager.get_session(&session.id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Idle);
}

#[tokio::test]
async fn absolute_cap_stops_session_and_releases_lock() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::tool_call(
        call("c1", "hang"),
    ))]));
    let p = pipeline(inference).await;
    let locks = RepoLockManager::new(Arc::clone(&p.db), Duration::from_secs(1800));
    let launcher = ScheduledLauncher::new(
        locks.clone(),
        Arc::clone(&p.manager),
        Duration::from_millis(200),
    );

    let LaunchOutcome::Started {
        session, watcher, ..
    } = launcher.launch(run("nightly")).await.unwrap()
    else {
        panic!("launch should start");
    };
    tokio::time::timeout(Duration::from_secs(10), watcher)
        .await
        .unwrap()
        .unwrap();

    let stopped = p.manager.get_session(&session.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(locks.holder("org/repoA").await.unwrap().is_none());
}
