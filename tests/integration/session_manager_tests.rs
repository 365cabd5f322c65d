use std::sync::Arc;
use std::time::Duration;

use agent_conductor::models::event::EventType;
use agent_conductor::models::session::SessionStatus;
use agent_conductor::runner::inference::InferenceResponse;
use agent_conductor::AppError;

use super::test_helpers::{call, collect, pipeline, types, ScriptedInference};

#[tokio::test]
async fn create_session_stream_sees_first_event() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::answer(
        "All tests pass.",
    ))]));
    let p = pipeline(inference).await;

    let (snapshot, stream) = p
        .manager
        .create_session("proj-1", "agent-1", "run the tests")
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.total_turns, 0);

    let events = collect(stream).await;
    assert_eq!(events[0].sequence, 1);
    assert_eq!(types(&events), vec![EventType::Assistant, EventType::Result]);

    let done = p.manager.get_session(&snapshot.id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Idle);
    assert_eq!(done.total_turns, 1);
}

#[tokio::test]
async fn reserve_then_subscribe_then_start() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::answer(
        "ok",
    ))]));
    let p = pipeline(inference).await;

    let snapshot = p
        .manager
        .reserve_session("proj-1", "agent-1", "hello")
        .await
        .unwrap();
    let stream = p.bus.subscribe(&snapshot.id);
    p.manager.start_session(&snapshot.id).unwrap();

    let events = collect(stream).await;
    assert_eq!(events.first().map(|e| e.sequence), Some(1));

    let again = p.manager.start_session(&snapshot.id);
    assert!(matches!(
        again,
        Err(AppError::Protocol(_) | AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn stop_is_idempotent_and_delete_removes_row() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::tool_call(
        call("c1", "hang"),
    ))]));
    let p = pipeline(inference).await;

    let (snapshot, mut stream) = p
        .manager
        .create_session("proj-1", "agent-1", "wait")
        .await
        .unwrap();
    let first = stream.recv().await.unwrap();
    assert_eq!(first.event_type(), EventType::ToolStatus);

    let stopped = tokio::time::timeout(
        Duration::from_secs(5),
        p.manager.stop_session(&snapshot.id),
    )
    .await
    .expect("stop returns promptly")
    .unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);

    let again = p.manager.stop_session(&snapshot.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Stopped);
    assert_eq!(p.manager.active_count(), 0);

    assert!(p.manager.delete_session(&snapshot.id).await.unwrap());
    assert!(matches!(
        p.manager.get_session(&snapshot.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(!p.manager.delete_session(&snapshot.id).await.unwrap());
}

#[tokio::test]
async fn stopping_reserved_session_emits_session_exited() {
    let p = pipeline(Arc::new(ScriptedInference::new(Vec::new()))).await;

    let snapshot = p
        .manager
        .reserve_session("proj-1", "agent-1", "never started")
        .await
        .unwrap();
    let stream = p.bus.subscribe(&snapshot.id);

    let stopped = p.manager.stop_session(&snapshot.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert_eq!(types(&collect(stream).await), vec![EventType::SessionExited]);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let p = pipeline(Arc::new(ScriptedInference::new(Vec::new()))).await;
    assert!(matches!(
        p.manager.get_session("missing").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        p.manager.stop_session("missing").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_sessions_serialize_on_admission() {
    let inference = Arc::new(
        ScriptedInference::repeating(InferenceResponse::answer("done"))
            .with_delay(Duration::from_millis(20)),
    );
    let p = pipeline(inference.clone()).await;

    let mut streams = Vec::new();
    for i in 0..3 {
        let (_, stream) = p
            .manager
            .create_session("proj-1", &format!("agent-{i}"), "go")
            .await
            .unwrap();
        streams.push(stream);
    }
    for stream in streams {
        let events = collect(stream).await;
        assert_eq!(events.last().map(|e| e.event_type()), Some(EventType::Result));
    }
    assert_eq!(inference.calls(), 3);
    assert!(!p.admission.is_busy());
}
