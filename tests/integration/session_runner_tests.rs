use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agent_conductor::config::RunnerConfig;
use agent_conductor::models::event::{EventPayload, EventType};
use agent_conductor::models::session::{Session, SessionStatus};
use agent_conductor::models::tool::ToolOutcome;
use agent_conductor::runner::inference::{ChatRole, InferenceResponse};
use agent_conductor::AppError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{call, collect, pipeline, pipeline_with, types, ScriptedInference};

async fn new_session(p: &super::test_helpers::Pipeline) -> Session {
    p.sessions
        .create(&Session::new("proj-1".into(), "agent-1".into()))
        .await
        .expect("create session")
}

#[tokio::test]
async fn failing_tool_is_reported_and_session_reaches_idle() {
    let inference = Arc::new(ScriptedInference::new(vec![
        Ok(InferenceResponse::tool_call(call("c1", "read_file"))),
        Ok(InferenceResponse::answer(
            "The file does not exist, so there is nothing to change.",
        )),
    ]));
    let p = pipeline(inference.clone()).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    let summary = p
        .runner
        .run(
            session.clone(),
            "fix src/missing.rs".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Idle);
    assert_eq!(summary.total_turns, 2);
    assert_eq!(summary.invocations.len(), 1);
    assert!(matches!(
        &summary.invocations[0].outcome,
        ToolOutcome::Failure { error_message } if error_message.contains("file not found")
    ));

    let events = collect(stream).await;
    let kinds = types(&events);
    let first_tool = kinds
        .iter()
        .position(|k| *k == EventType::ToolStatus)
        .expect("tool_status emitted");
    let assistant = kinds
        .iter()
        .position(|k| *k == EventType::Assistant)
        .expect("assistant emitted");
    assert!(first_tool < assistant);
    assert_eq!(kinds.last(), Some(&EventType::Result));
    assert!(!kinds.contains(&EventType::Error));

    // The error went back to the model as a synthetic tool result.
    let second = &inference.requests()[1];
    let tool_msg = second
        .messages
        .iter()
        .find(|m| m.role == ChatRole::Tool)
        .expect("tool result in transcript");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_msg.content.starts_with("Error:"));
    assert!(tool_msg.content.contains("file not found"));

    let stored = p.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Idle);
    assert_eq!(stored.total_turns, 2);
}

#[tokio::test]
async fn iteration_cap_forces_error_before_extra_call_runs() {
    let inference = Arc::new(ScriptedInference::repeating(InferenceResponse::tool_call(
        call("c", "count"),
    )));
    let p = pipeline(inference.clone()).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    let summary = p
        .runner
        .run(
            session.clone(),
            "loop forever".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Error);
    assert_eq!(p.tool_calls.load(Ordering::SeqCst), 25);
    assert_eq!(inference.calls(), 26);

    let events = collect(stream).await;
    let last = events.last().expect("terminal event");
    let EventPayload::Error { message } = &last.payload else {
        panic!("expected error event, got {:?}", last.payload);
    };
    assert!(message.contains("iteration"), "message: {message}");

    let stored = p.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Error);
}

#[tokio::test]
async fn configured_cap_is_honoured() {
    let inference = Arc::new(ScriptedInference::repeating(InferenceResponse::tool_call(
        call("c", "count"),
    )));
    let config = RunnerConfig {
        max_tool_iterations: 3,
        ..RunnerConfig::default()
    };
    let p = pipeline_with(inference, config).await;
    let session = new_session(&p).await;

    let summary = p
        .runner
        .run(
            session.clone(),
            "go".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Error);
    assert_eq!(p.tool_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn inference_failure_is_turn_fatal() {
    let inference = Arc::new(ScriptedInference::new(vec![Err(AppError::Inference(
        "backend unavailable".into(),
    ))]));
    let p = pipeline(inference).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    let summary = p
        .runner
        .run(
            session.clone(),
            "hello".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Error);
    let events = collect(stream).await;
    assert_eq!(types(&events), vec![EventType::Error]);
    let EventPayload::Error { message } = &events[0].payload else {
        panic!("expected error payload");
    };
    assert!(message.contains("backend unavailable"));
    assert!(!p.admission.is_busy());
}

#[tokio::test]
async fn cancellation_abandons_in_flight_tool_and_stops() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::tool_call(
        call("c1", "hang"),
    ))]));
    let p = pipeline(inference).await;
    let session = new_session(&p).await;
    let mut stream = p.bus.subscribe(&session.id);
    let cancel = CancellationToken::new();

    let runner = p.runner.clone();
    let publisher = p.bus.publisher(&session.id);
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        runner
            .run(session, "wait".into(), publisher, run_cancel)
            .await
    });

    let first = stream.recv().await.expect("tool_status before hang");
    assert_eq!(first.event_type(), EventType::ToolStatus);
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancellation must not block on the hung tool")
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);

    let rest = collect(stream).await;
    assert_eq!(types(&rest), vec![EventType::SessionExited]);
}

#[tokio::test]
async fn cancellation_while_waiting_for_admission_stops_without_inference() {
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse::answer(
        "unreachable",
    ))]));
    let p = pipeline(inference.clone()).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    let held = p.admission.acquire().await.unwrap();
    let cancel = CancellationToken::new();
    let runner = p.runner.clone();
    let publisher = p.bus.publisher(&session.id);
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        runner
            .run(session, "queued".into(), publisher, run_cancel)
            .await
    });

    while p.admission.waiting() == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();
    let summary = task.await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert_eq!(p.admission.waiting(), 0);
    drop(held);

    assert_eq!(inference.calls(), 0);
    assert_eq!(types(&collect(stream).await), vec![EventType::SessionExited]);
}

#[tokio::test]
async fn sequences_are_gapless_from_one() {
    let inference = Arc::new(ScriptedInference::new(vec![
        Ok(InferenceResponse {
            thinking: Some("look at the file first".into()),
            content: "Checking.".into(),
            tool_calls: vec![call("c1", "count"), call("c2", "count")],
        }),
        Ok(InferenceResponse::answer("done")),
    ]));
    let p = pipeline(inference).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    p.runner
        .run(
            session.clone(),
            "go".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    let events = collect(stream).await;
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(sequences, expected);
    assert_eq!(events[0].event_type(), EventType::Thinking);
}

#[tokio::test]
async fn unknown_tool_is_recovered_in_loop() {
    let inference = Arc::new(ScriptedInference::new(vec![
        Ok(InferenceResponse::tool_call(call("c1", "no_such_tool"))),
        Ok(InferenceResponse::answer("I could not use that tool.")),
    ]));
    let p = pipeline(inference).await;
    let session = new_session(&p).await;

    let summary = p
        .runner
        .run(
            session.clone(),
            "go".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Idle);
    assert!(summary.invocations[0].outcome.is_failure());
}

#[tokio::test]
async fn cap_refuses_extra_call_within_single_response() {
    let calls = (1..=26).map(|i| call(&format!("c{i}"), "count")).collect();
    let inference = Arc::new(ScriptedInference::new(vec![Ok(InferenceResponse {
        thinking: None,
        content: String::new(),
        tool_calls: calls,
    })]));
    let p = pipeline(inference.clone()).await;
    let session = new_session(&p).await;
    let stream = p.bus.subscribe(&session.id);

    let summary = p
        .runner
        .run(
            session.clone(),
            "do everything at once".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Error);
    assert_eq!(p.tool_calls.load(Ordering::SeqCst), 25);
    assert_eq!(summary.invocations.len(), 25);
    assert_eq!(inference.calls(), 1);

    let events = collect(stream).await;
    let tool_statuses = types(&events)
        .iter()
        .filter(|k| **k == EventType::ToolStatus)
        .count();
    assert_eq!(tool_statuses, 25);
    let EventPayload::Error { message } = &events.last().expect("terminal event").payload else {
        panic!("expected error event");
    };
    assert!(message.contains("25 tool iterations"), "message: {message}");
}

#[tokio::test]
async fn timed_out_tool_is_aborted_before_its_side_effect() {
    let inference = Arc::new(ScriptedInference::new(vec![
        Ok(InferenceResponse::tool_call(call("c1", "slow_count"))),
        Ok(InferenceResponse::answer("The count timed out.")),
    ]));
    let config = RunnerConfig {
        tool_timeout_seconds: 1,
        ..RunnerConfig::default()
    };
    let p = pipeline_with(inference, config).await;
    let session = new_session(&p).await;

    let summary = p
        .runner
        .run(
            session.clone(),
            "count slowly".into(),
            p.bus.publisher(&session.id),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.status, SessionStatus::Idle);
    assert!(matches!(
        &summary.invocations[0].outcome,
        ToolOutcome::Failure { error_message } if error_message.contains("timed out")
    ));

    // Well past the point the tool would have counted.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(p.tool_calls.load(Ordering::SeqCst), 0);
}
