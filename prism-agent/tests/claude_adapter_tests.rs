// ABOUTME: Tests for the hook/callback-replay adapter over a scripted Claude transport.
// ABOUTME: Covers delta streaming, hook-based subagents, semantic tool folding and turn endings.

use futures::StreamExt;
use prism_agent::backends::claude::{ClaudeAdapter, HookAck, SdkMessage};
use prism_agent::event::{SkillStatus, SubagentCompleteData, SubagentStartData};
use prism_agent::message::MessageKind;
use prism_agent::testing::{ClaudeStep, EventRecorder, FakeClaude};
use prism_agent::{Adapter, EventPayload, EventType, SessionContext, TurnError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn msg(value: Value) -> ClaudeStep {
    ClaudeStep::Message(serde_json::from_value::<SdkMessage>(value).unwrap())
}

fn message_start(id: &str) -> ClaudeStep {
    msg(json!({
        "type": "stream_event",
        "event": {"type": "message_start", "message": {"id": id, "role": "assistant"}}
    }))
}

fn text_delta(text: &str) -> ClaudeStep {
    msg(json!({
        "type": "stream_event",
        "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}
    }))
}

fn thinking_delta(thinking: &str) -> ClaudeStep {
    msg(json!({
        "type": "stream_event",
        "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": thinking}}
    }))
}

fn assistant(id: &str, content: Value) -> ClaudeStep {
    msg(json!({"type": "assistant", "message": {"id": id, "content": content}}))
}

fn tool_result(tool_use_id: &str, content: &str, is_error: bool) -> ClaudeStep {
    msg(json!({
        "type": "user",
        "message": {"content": [{"type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error}]}
    }))
}

fn result(subtype: &str) -> ClaudeStep {
    msg(json!({"type": "result", "subtype": subtype, "is_error": false, "result": "done"}))
}

fn adapter(fake: &FakeClaude) -> (ClaudeAdapter, EventRecorder) {
    let ctx = SessionContext::new("session-1");
    let recorder = EventRecorder::attach(&ctx);
    (ClaudeAdapter::new(ctx, Box::new(fake.clone())), recorder)
}

#[tokio::test]
async fn test_deltas_are_yielded_and_final_text_is_suppressed() {
    let fake = FakeClaude::new().turn(vec![
        message_start("msg_1"),
        text_delta("Hel"),
        text_delta("lo"),
        assistant("msg_1", json!([{"type": "text", "text": "Hello"}])),
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    let messages: Vec<_> = adapter
        .stream("say hello", CancellationToken::new())
        .collect()
        .await;

    let texts: Vec<_> = messages
        .iter()
        .map(|m| m.as_ref().unwrap().as_text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["Hel", "lo"]);
    assert!(messages.iter().all(|m| m.as_ref().unwrap().is_partial()));
    assert_eq!(messages[0].as_ref().unwrap().message_id(), Some("msg_1"));
    assert_eq!(recorder.count(EventType::Text), 2);
    assert_eq!(fake.prompts(), vec!["say hello".to_string()]);
}

#[tokio::test]
async fn test_send_reports_stop_reason_and_completeness() {
    let fake = FakeClaude::new().turn(vec![
        message_start("msg_1"),
        text_delta("Hi"),
        assistant("msg_1", json!([{"type": "text", "text": "Hi"}])),
        result("success"),
    ]);
    let (adapter, _recorder) = adapter(&fake);

    let summary = adapter.send("hi").await.unwrap();
    assert_eq!(summary.messages, 1);
    assert!(!summary.incomplete);
    assert_eq!(summary.stop_reason.as_deref(), Some("success"));
}

#[tokio::test]
async fn test_text_without_deltas_is_yielded_whole() {
    let fake = FakeClaude::new().turn(vec![
        assistant("msg_1", json!([{"type": "thinking", "thinking": "plan"}, {"type": "text", "text": "Answer"}])),
        result("success"),
    ]);
    let (adapter, _recorder) = adapter(&fake);

    let messages: Vec<_> = adapter
        .stream("q", CancellationToken::new())
        .map(|m| m.unwrap())
        .collect()
        .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].kind, MessageKind::Thinking);
    assert_eq!(messages[1].as_text(), Some("Answer"));
    assert!(!messages[1].is_partial());
}

#[tokio::test]
async fn test_thinking_deltas_leave_final_text_of_same_message() {
    let fake = FakeClaude::new().turn(vec![
        message_start("msg_1"),
        thinking_delta("plan"),
        assistant(
            "msg_1",
            json!([{"type": "thinking", "thinking": "plan"}, {"type": "text", "text": "Answer"}]),
        ),
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    let messages: Vec<_> = adapter
        .stream("q", CancellationToken::new())
        .map(|m| m.unwrap())
        .collect()
        .await;

    let kinds: Vec<_> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Thinking, MessageKind::Text]);
    assert!(messages[0].is_partial());
    assert_eq!(messages[1].as_text(), Some("Answer"));
    assert_eq!(messages[1].message_id(), Some("msg_1"));
    assert_eq!(recorder.count(EventType::Thinking), 1);
}

#[tokio::test]
async fn test_subagent_hooks_map_to_start_and_complete() {
    let fake = FakeClaude::new().turn(vec![
        ClaudeStep::HookStart {
            agent_id: "agent-1".to_string(),
            agent_type: "Explore".to_string(),
        },
        ClaudeStep::HookStop {
            agent_id: "agent-1".to_string(),
        },
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    adapter.send("explore").await.unwrap();

    assert_eq!(
        recorder.payloads(EventType::SubagentStart),
        vec![EventPayload::SubagentStart(SubagentStartData {
            subagent_id: "agent-1".to_string(),
            subagent_type: Some("Explore".to_string()),
            description: None,
        })]
    );
    // The stop hook cannot report failure
    assert_eq!(
        recorder.payloads(EventType::SubagentComplete),
        vec![EventPayload::SubagentComplete(SubagentCompleteData {
            subagent_id: "agent-1".to_string(),
            success: true,
            result: None,
            error: None,
        })]
    );
    assert_eq!(fake.acks(), vec![HookAck::proceed(), HookAck::proceed()]);
}

#[tokio::test]
async fn test_hook_with_missing_fields_uses_empty_strings() {
    let fake = FakeClaude::new().turn(vec![
        ClaudeStep::HookStart {
            agent_id: String::new(),
            agent_type: String::new(),
        },
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    adapter.send("x").await.unwrap();

    assert_eq!(
        recorder.payloads(EventType::SubagentStart),
        vec![EventPayload::SubagentStart(SubagentStartData {
            subagent_id: String::new(),
            subagent_type: Some(String::new()),
            description: None,
        })]
    );
}

#[tokio::test]
async fn test_task_tool_is_left_to_the_hooks() {
    let fake = FakeClaude::new().turn(vec![
        assistant(
            "msg_1",
            json!([{"type": "tool_use", "id": "toolu_1", "name": "Task", "input": {"description": "look", "subagent_type": "Explore"}}]),
        ),
        ClaudeStep::HookStart {
            agent_id: "agent-1".to_string(),
            agent_type: "Explore".to_string(),
        },
        ClaudeStep::HookStop {
            agent_id: "agent-1".to_string(),
        },
        tool_result("toolu_1", "found it", false),
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    let summary = adapter.send("delegate").await.unwrap();

    assert_eq!(summary.messages, 0);
    assert_eq!(recorder.count(EventType::ToolUse), 0);
    assert_eq!(recorder.count(EventType::ToolExecutionStart), 0);
    assert_eq!(recorder.count(EventType::ToolResult), 0);
    assert_eq!(recorder.count(EventType::SubagentStart), 1);
    assert_eq!(recorder.count(EventType::SubagentComplete), 1);
}

#[tokio::test]
async fn test_skill_tool_folds_into_skill_events() {
    let fake = FakeClaude::new().turn(vec![
        assistant(
            "msg_1",
            json!([{"type": "tool_use", "id": "toolu_2", "name": "Skill", "input": {"skill": "pdf"}}]),
        ),
        tool_result("toolu_2", "loaded", false),
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    adapter.send("use pdf").await.unwrap();

    let statuses: Vec<_> = recorder
        .payloads(EventType::SkillInvoked)
        .into_iter()
        .map(|p| match p {
            EventPayload::SkillInvoked(data) => (data.name, data.status),
            other => panic!("unexpected payload: {:?}", other),
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("pdf".to_string(), SkillStatus::Loading),
            ("pdf".to_string(), SkillStatus::Loaded),
        ]
    );
    assert_eq!(recorder.count(EventType::ToolUse), 0);
}

#[tokio::test]
async fn test_generic_tool_yields_use_and_result_once() {
    let fake = FakeClaude::new().turn(vec![
        assistant(
            "msg_1",
            json!([{"type": "tool_use", "id": "toolu_3", "name": "Read", "input": {"file_path": "/tmp/a"}}]),
        ),
        tool_result("toolu_3", "contents", false),
        tool_result("toolu_3", "contents", false),
        result("success"),
    ]);
    let (adapter, recorder) = adapter(&fake);

    let messages: Vec<_> = adapter
        .stream("read", CancellationToken::new())
        .map(|m| m.unwrap())
        .collect()
        .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].kind, MessageKind::ToolUse);
    assert_eq!(messages[1].kind, MessageKind::ToolResult);
    assert_eq!(messages[1].metadata["toolName"], "Read");
    assert_eq!(
        recorder.types(),
        vec![
            EventType::ToolUse,
            EventType::ToolExecutionStart,
            EventType::ToolResult,
            EventType::ToolExecutionComplete,
        ]
    );
}

#[tokio::test]
async fn test_abort_interrupts_and_reports_incomplete_message() {
    let fake = FakeClaude::new().turn(vec![
        message_start("msg_1"),
        text_delta("partial"),
        ClaudeStep::Pending,
    ]);
    let (adapter, _recorder) = adapter(&fake);
    let abort = CancellationToken::new();

    let mut stream = adapter.stream("long task", abort.clone());
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.as_text(), Some("partial"));

    abort.cancel();
    let last = stream.next().await.unwrap();
    assert_eq!(
        last,
        Err(TurnError::Aborted {
            incomplete: vec!["msg_1".to_string()]
        })
    );
    assert!(stream.next().await.is_none());
    drop(stream);

    assert_eq!(fake.interrupts(), 1);
}

#[tokio::test]
async fn test_error_result_fails_the_turn() {
    let fake = FakeClaude::new().turn(vec![msg(json!({
        "type": "result",
        "subtype": "error_during_execution",
        "is_error": true,
        "result": "boom"
    }))]);
    let (adapter, _recorder) = adapter(&fake);

    let err = adapter.send("x").await.unwrap_err();
    assert_eq!(err, TurnError::Backend("boom".to_string()));
}

#[tokio::test]
async fn test_stream_ending_without_result_is_connection_loss() {
    let fake = FakeClaude::new().turn(vec![message_start("msg_1")]);
    let (adapter, _recorder) = adapter(&fake);

    let err = adapter.send("x").await.unwrap_err();
    assert!(matches!(err, TurnError::ConnectionLost(_)));
}

#[tokio::test]
async fn test_query_failure_is_connection_loss() {
    // No scripted turn: the fake refuses the query
    let fake = FakeClaude::new();
    let (adapter, _recorder) = adapter(&fake);

    let err = adapter.send("x").await.unwrap_err();
    assert!(matches!(err, TurnError::ConnectionLost(reason) if reason.contains("no scripted turn")));
}

#[tokio::test]
async fn test_skill_is_reported_once_per_session() {
    let skill_turn = |id: &str| {
        vec![
            assistant(
                "msg",
                json!([{"type": "tool_use", "id": id, "name": "Skill", "input": {"skill": "pdf"}}]),
            ),
            tool_result(id, "ok", false),
            result("success"),
        ]
    };
    let fake = FakeClaude::new()
        .turn(skill_turn("toolu_a"))
        .turn(skill_turn("toolu_b"));
    let (adapter, recorder) = adapter(&fake);

    adapter.send("first").await.unwrap();
    adapter.send("second").await.unwrap();

    assert_eq!(recorder.count(EventType::SkillInvoked), 2);
}
