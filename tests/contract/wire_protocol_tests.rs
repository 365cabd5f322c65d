use agent_conductor::gateway::{ClientMessage, ServerMessage};
use agent_conductor::models::event::{EventPayload, MessageContent, SessionEvent};
use agent_conductor::models::session::{SessionSnapshot, SessionStatus};
use serde_json::{json, Value};

fn push(sequence: u64, payload: EventPayload) -> Value {
    let event = SessionEvent {
        session_id: "sess-42".into(),
        sequence,
        payload,
    };
    serde_json::from_str(&ServerMessage::from_event(&event).to_text().unwrap()).unwrap()
}

#[test]
fn subscribe_frame_shape() {
    let frame = serde_json::to_value(ClientMessage::Subscribe {
        session_id: "sess-42".into(),
    })
    .unwrap();
    assert_eq!(frame, json!({ "type": "subscribe", "sessionId": "sess-42" }));
}

#[test]
fn unknown_client_message_is_protocol_error() {
    let err = ClientMessage::parse(r#"{"type":"resubscribe","sessionId":"s"}"#).unwrap_err();
    assert!(err.to_string().starts_with("protocol:"));
}

#[test]
fn assistant_push_carries_message_content() {
    let value = push(
        2,
        EventPayload::Assistant {
            content: MessageContent::Text("Refactor complete.".into()),
        },
    );
    assert_eq!(value["type"], "session_event");
    assert_eq!(value["sessionId"], "sess-42");
    assert_eq!(value["event"]["eventType"], "assistant");
    assert_eq!(value["event"]["sequence"], 2);
    assert_eq!(
        value["event"]["data"]["message"]["content"],
        "Refactor complete."
    );
}

#[test]
fn terminal_push_shapes() {
    let result = push(
        5,
        EventPayload::Result {
            content: "All done".into(),
        },
    );
    assert_eq!(result["event"]["eventType"], "result");
    assert_eq!(result["event"]["data"], json!({ "content": "All done" }));

    let error = push(
        6,
        EventPayload::Error {
            message: "exceeded maximum of 25 tool iterations".into(),
        },
    );
    assert_eq!(error["event"]["eventType"], "error");
    assert_eq!(
        error["event"]["data"]["error"]["message"],
        "exceeded maximum of 25 tool iterations"
    );

    let exited = push(
        7,
        EventPayload::SessionExited {
            reason: "stopped".into(),
        },
    );
    assert_eq!(exited["event"]["eventType"], "session_exited");
}

#[test]
fn subscribed_ack_and_error_frames() {
    let ack = serde_json::to_value(ServerMessage::Subscribed {
        session_id: "sess-42".into(),
    })
    .unwrap();
    assert_eq!(ack, json!({ "type": "subscribed", "sessionId": "sess-42" }));

    let error = serde_json::to_value(ServerMessage::Error {
        message: "invalid client message".into(),
    })
    .unwrap();
    assert_eq!(
        error,
        json!({ "type": "error", "message": "invalid client message" })
    );
}

#[test]
fn status_body_shape() {
    let body = serde_json::to_value(SessionSnapshot {
        id: "sess-42".into(),
        status: SessionStatus::Running,
        total_turns: 4,
    })
    .unwrap();
    assert_eq!(
        body,
        json!({ "id": "sess-42", "status": "running", "totalTurns": 4 })
    );
}
