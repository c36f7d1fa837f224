// ABOUTME: Tests for terminal rendering of normalized messages and session events
// ABOUTME: Covers inline text, prefixed lines and line breaking between the two

use prism::render::{event_line, stopped_early, summarize, Fragment, Renderer, Terminal};
use prism_agent::event::{
    AgentEvent, EventPayload, QuestionData, SkillData, SkillStatus, SubagentCompleteData,
    SubagentStartData,
};
use prism_agent::{NormalizedMessage, TurnError};
use serde_json::json;

fn event(payload: EventPayload) -> AgentEvent {
    AgentEvent::new("s1", payload)
}

#[test]
fn test_text_is_inline_and_thinking_hidden_by_default() {
    let renderer = Renderer::default();
    assert_eq!(
        renderer.message(&NormalizedMessage::text("Hello")),
        Some(Fragment::Inline("Hello".to_string()))
    );
    assert_eq!(renderer.message(&NormalizedMessage::thinking("hmm")), None);

    let verbose = Renderer {
        show_thinking: true,
    };
    assert_eq!(
        verbose.message(&NormalizedMessage::thinking("look\nat files")),
        Some(Fragment::Line("[thinking] look at files".to_string()))
    );
}

#[test]
fn test_tool_lines() {
    let renderer = Renderer::default();
    let call = NormalizedMessage::tool_use("c1", "bash", json!({"command": "ls"}));
    assert_eq!(
        renderer.message(&call),
        Some(Fragment::Line(r#"[tool] bash {"command":"ls"}"#.to_string()))
    );

    let ok = NormalizedMessage::tool_result("c1", Some("bash"), json!("a.rs"), false);
    assert_eq!(
        renderer.message(&ok),
        Some(Fragment::Line("[tool] bash done".to_string()))
    );

    let failed = NormalizedMessage::tool_result("c2", None, json!("no such file"), true);
    assert_eq!(
        renderer.message(&failed),
        Some(Fragment::Line("[tool] tool failed: no such file".to_string()))
    );
}

#[test]
fn test_event_lines() {
    let start = event(EventPayload::SubagentStart(SubagentStartData {
        subagent_id: "a1".to_string(),
        subagent_type: Some("explore".to_string()),
        description: Some("Find the parser".to_string()),
    }));
    assert_eq!(
        event_line(&start).as_deref(),
        Some("[subagent] explore started: Find the parser")
    );

    let failed = event(EventPayload::SubagentComplete(SubagentCompleteData {
        subagent_id: "a1".to_string(),
        success: false,
        result: None,
        error: Some("timeout".to_string()),
    }));
    assert_eq!(event_line(&failed).as_deref(), Some("[subagent] a1 failed: timeout"));

    let skill = event(EventPayload::SkillInvoked(SkillData {
        name: "pdf".to_string(),
        status: SkillStatus::Loaded,
        path: None,
        description: None,
    }));
    assert_eq!(event_line(&skill).as_deref(), Some("[skill] pdf loaded"));

    let question = event(EventPayload::QuestionAsked(QuestionData {
        question_id: "q1".to_string(),
        input: json!({"question": "Proceed?"}),
    }));
    assert_eq!(event_line(&question).as_deref(), Some("[question] Proceed?"));
}

#[test]
fn test_stopped_early_message() {
    assert_eq!(
        stopped_early(&TurnError::Aborted { incomplete: vec![] }),
        "stopped early: turn aborted"
    );
}

#[test]
fn test_summarize_truncates_long_text() {
    let long = "x".repeat(200);
    let summary = summarize(&long);
    assert_eq!(summary.chars().count(), 80);
    assert!(summary.ends_with('…'));
}

#[test]
fn test_terminal_breaks_line_before_prefixed_output() {
    let terminal = Terminal::new(Vec::new());
    terminal.inline("Hel");
    terminal.inline("lo");
    terminal.line("[tool] bash done");
    terminal.inline("Bye");
    terminal.finish();
    terminal.finish();

    let out = String::from_utf8(terminal.into_inner()).unwrap();
    assert_eq!(out, "Hello\n[tool] bash done\nBye\n");
}
