// ABOUTME: Normalized messages yielded by a turn stream.
// ABOUTME: The linear content subset of the event model: text, thinking, tool use and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolUse,
    ToolResult,
    Thinking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
    Tool,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(Value),
}

/// One item of a turn stream.
///
/// Ordering within one `messageId` follows the backend's emission order.
/// Incremental deltas carry `partial: true` in their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl NormalizedMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: MessageContent::Text(text.into()),
            role: Some(Role::Assistant),
            metadata: Map::new(),
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Thinking,
            content: MessageContent::Text(text.into()),
            role: Some(Role::Assistant),
            metadata: Map::new(),
        }
    }

    pub fn tool_use(call_id: &str, name: &str, input: Value) -> Self {
        Self {
            kind: MessageKind::ToolUse,
            content: MessageContent::Structured(input),
            role: Some(Role::Assistant),
            metadata: Map::new(),
        }
        .with_metadata("toolCallId", call_id)
        .with_metadata("toolName", name)
    }

    pub fn tool_result(call_id: &str, name: Option<&str>, output: Value, is_error: bool) -> Self {
        let mut message = Self {
            kind: MessageKind::ToolResult,
            content: MessageContent::Structured(output),
            role: Some(Role::Tool),
            metadata: Map::new(),
        }
        .with_metadata("toolCallId", call_id)
        .with_metadata("isError", is_error);
        if let Some(name) = name {
            message = message.with_metadata("toolName", name);
        }
        message
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Text content for text and thinking messages
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Structured(_) => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.metadata.get("messageId").and_then(|v| v.as_str())
    }

    pub fn is_partial(&self) -> bool {
        self.metadata
            .get("partial")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
