// ABOUTME: Event types shared by every backend adapter and the session façade.
// ABOUTME: A closed EventType set plus a tagged envelope whose payload shape follows its type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every kind of event a session can dispatch to subscribers.
///
/// Adding a variant means teaching all three adapters and the occurrence key
/// scheme in [`crate::coordinator`] about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "tool_use")]
    ToolUse,
    #[serde(rename = "tool_result")]
    ToolResult,
    #[serde(rename = "thinking")]
    Thinking,
    #[serde(rename = "subagent.start")]
    SubagentStart,
    #[serde(rename = "subagent.complete")]
    SubagentComplete,
    #[serde(rename = "skill.invoked")]
    SkillInvoked,
    #[serde(rename = "question.asked")]
    QuestionAsked,
    #[serde(rename = "tool.execution_start")]
    ToolExecutionStart,
    #[serde(rename = "tool.execution_complete")]
    ToolExecutionComplete,
    #[serde(rename = "turn.complete")]
    TurnComplete,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::Text,
        EventType::ToolUse,
        EventType::ToolResult,
        EventType::Thinking,
        EventType::SubagentStart,
        EventType::SubagentComplete,
        EventType::SkillInvoked,
        EventType::QuestionAsked,
        EventType::ToolExecutionStart,
        EventType::ToolExecutionComplete,
        EventType::TurnComplete,
        EventType::Error,
    ];

    /// Wire name, e.g. `subagent.start`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Thinking => "thinking",
            Self::SubagentStart => "subagent.start",
            Self::SubagentComplete => "subagent.complete",
            Self::SkillInvoked => "skill.invoked",
            Self::QuestionAsked => "question.asked",
            Self::ToolExecutionStart => "tool.execution_start",
            Self::ToolExecutionComplete => "tool.execution_complete",
            Self::TurnComplete => "turn.complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown event type: {}", s))
    }
}

/// Streaming or complete assistant text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub text: String,
    /// True for an incremental delta, false for a materialized message
    #[serde(default)]
    pub partial: bool,
}

/// Model reasoning, streamed or complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseData {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultData {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentStartData {
    pub subagent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Terminal record of a sub-agent run.
///
/// `success` is best-effort for the hook-based backend, whose stop hook
/// cannot report failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentCompleteData {
    pub subagent_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Loading,
    Loaded,
    Error,
}

/// A skill occurrence. Status transitions for an already-announced skill
/// carry only `name` and `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillData {
    pub name: String,
    pub status: SkillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Human-in-the-loop question raised through a question tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionData {
    pub question_id: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionStartData {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionCompleteData {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompleteData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub message: String,
    /// True when the turn was cancelled rather than failed
    #[serde(default)]
    pub aborted: bool,
}

/// Event payload, discriminated by its wire type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "text")]
    Text(TextData),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseData),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultData),
    #[serde(rename = "thinking")]
    Thinking(ThinkingData),
    #[serde(rename = "subagent.start")]
    SubagentStart(SubagentStartData),
    #[serde(rename = "subagent.complete")]
    SubagentComplete(SubagentCompleteData),
    #[serde(rename = "skill.invoked")]
    SkillInvoked(SkillData),
    #[serde(rename = "question.asked")]
    QuestionAsked(QuestionData),
    #[serde(rename = "tool.execution_start")]
    ToolExecutionStart(ToolExecutionStartData),
    #[serde(rename = "tool.execution_complete")]
    ToolExecutionComplete(ToolExecutionCompleteData),
    #[serde(rename = "turn.complete")]
    TurnComplete(TurnCompleteData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Text(_) => EventType::Text,
            Self::ToolUse(_) => EventType::ToolUse,
            Self::ToolResult(_) => EventType::ToolResult,
            Self::Thinking(_) => EventType::Thinking,
            Self::SubagentStart(_) => EventType::SubagentStart,
            Self::SubagentComplete(_) => EventType::SubagentComplete,
            Self::SkillInvoked(_) => EventType::SkillInvoked,
            Self::QuestionAsked(_) => EventType::QuestionAsked,
            Self::ToolExecutionStart(_) => EventType::ToolExecutionStart,
            Self::ToolExecutionComplete(_) => EventType::ToolExecutionComplete,
            Self::TurnComplete(_) => EventType::TurnComplete,
            Self::Error(_) => EventType::Error,
        }
    }
}

/// Envelope dispatched to subscribers: `{ sessionId, type, data }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn new(session_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            payload,
        }
    }

    /// The type is derived from the payload, so the two can never disagree
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
