use agent_conductor::models::event::{
    EventPayload, EventType, MessageContent, SessionEvent, WireEvent,
};
use serde_json::json;

#[test]
fn camel_case_aliases_parse() {
    assert_eq!(EventType::parse("toolStatus").unwrap(), EventType::ToolStatus);
    assert_eq!(
        EventType::parse("sessionExited").unwrap(),
        EventType::SessionExited
    );
    assert!(EventType::parse("heartbeat").is_err());
}

#[test]
fn tool_status_accepts_alternate_keys() {
    for data in [
        json!({ "statusMessage": "Running tool `grep`" }),
        json!({ "status_message": "Running tool `grep`" }),
        json!({ "status": "Running tool `grep`" }),
        json!("Running tool `grep`"),
    ] {
        let payload = EventPayload::from_data(EventType::ToolStatus, &data).unwrap();
        assert_eq!(
            payload,
            EventPayload::ToolStatus {
                status_message: "Running tool `grep`".into()
            }
        );
    }
}

#[test]
fn event_without_type_is_rejected() {
    let err = SessionEvent::from_value("s1", &json!({ "data": {} })).unwrap_err();
    assert!(err.to_string().contains("eventType"));
}

#[test]
fn wire_shapes_match_documented_payloads() {
    let assistant = SessionEvent {
        session_id: "s1".into(),
        sequence: 2,
        payload: EventPayload::Assistant {
            content: MessageContent::Text("Done.".into()),
        },
    };
    let wire = serde_json::to_value(assistant.to_wire()).unwrap();
    assert_eq!(
        wire,
        json!({
            "eventType": "assistant",
            "data": { "message": { "content": "Done." } },
            "sequence": 2
        })
    );

    let error = EventPayload::Error {
        message: "boom".into(),
    };
    assert_eq!(error.to_data(), json!({ "error": { "message": "boom" } }));

    let status = EventPayload::ToolStatus {
        status_message: "Running tool `ls`".into(),
    };
    assert_eq!(
        status.to_data(),
        json!({ "statusMessage": "Running tool `ls`" })
    );
}

#[test]
fn wire_event_normalizes_back_to_same_payload() {
    let original = SessionEvent {
        session_id: "s1".into(),
        sequence: 7,
        payload: EventPayload::SessionExited {
            reason: "cancelled".into(),
        },
    };
    let value = serde_json::to_value(original.to_wire()).unwrap();
    let parsed: WireEvent = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(parsed.event_type, EventType::SessionExited);
    assert_eq!(SessionEvent::from_value("s1", &value).unwrap(), original);
}

#[test]
fn block_content_ignores_non_text_blocks() {
    let content: MessageContent = serde_json::from_value(json!([
        { "type": "text", "text": "Hello, " },
        { "type": "image" },
        { "type": "text", "text": "world" }
    ]))
    .unwrap();
    assert_eq!(content.text(), "Hello, world");
}
