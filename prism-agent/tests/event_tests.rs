// ABOUTME: Tests for the event envelope wire shape and event type names.
// ABOUTME: Every dispatched event serializes as {sessionId, type, data}.

use prism_agent::event::{
    SkillData, SkillStatus, SubagentCompleteData, SubagentStartData, ToolExecutionCompleteData,
};
use prism_agent::{AgentEvent, EventPayload, EventType};
use serde_json::json;
use std::str::FromStr;

#[test]
fn test_envelope_has_session_type_and_data_only() {
    let event = AgentEvent::new(
        "s1",
        EventPayload::SubagentStart(SubagentStartData {
            subagent_id: "a1".to_string(),
            subagent_type: Some("Explore".to_string()),
            description: None,
        }),
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({
            "sessionId": "s1",
            "type": "subagent.start",
            "data": {"subagentId": "a1", "subagentType": "Explore"}
        })
    );
}

#[test]
fn test_skill_transition_carries_name_and_status_only() {
    let event = AgentEvent::new(
        "s1",
        EventPayload::SkillInvoked(SkillData {
            name: "pdf".to_string(),
            status: SkillStatus::Loaded,
            path: None,
            description: None,
        }),
    );
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["data"], json!({"name": "pdf", "status": "loaded"}));
}

#[test]
fn test_subagent_complete_and_tool_complete_are_camel_case() {
    let complete = serde_json::to_value(EventPayload::SubagentComplete(SubagentCompleteData {
        subagent_id: "a1".to_string(),
        success: false,
        result: None,
        error: Some("error".to_string()),
    }))
    .unwrap();
    assert_eq!(
        complete,
        json!({"type": "subagent.complete", "data": {"subagentId": "a1", "success": false, "error": "error"}})
    );

    let tool = serde_json::to_value(EventPayload::ToolExecutionComplete(ToolExecutionCompleteData {
        tool_call_id: "c1".to_string(),
        tool_name: Some("bash".to_string()),
        success: true,
        output: Some(json!("ok")),
        error: None,
    }))
    .unwrap();
    assert_eq!(tool["type"], "tool.execution_complete");
    assert_eq!(tool["data"]["toolCallId"], "c1");
    assert_eq!(tool["data"]["toolName"], "bash");
}

#[test]
fn test_envelope_round_trips_and_type_follows_payload() {
    let raw = json!({
        "sessionId": "s9",
        "type": "question.asked",
        "data": {"questionId": "q1", "input": {"question": "Proceed?"}}
    });
    let event: AgentEvent = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(event.event_type(), EventType::QuestionAsked);
    assert_eq!(serde_json::to_value(&event).unwrap(), raw);
}

#[test]
fn test_event_type_names_round_trip() {
    for event_type in EventType::ALL {
        let parsed = EventType::from_str(event_type.as_str()).unwrap();
        assert_eq!(parsed, event_type);
        assert_eq!(
            serde_json::to_value(event_type).unwrap(),
            json!(event_type.as_str())
        );
    }
}

#[test]
fn test_unknown_event_type_is_rejected() {
    let err = EventType::from_str("subagent.begin").unwrap_err();
    assert!(err.to_string().contains("subagent.begin"));
}
