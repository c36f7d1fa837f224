// ABOUTME: Decoder for OpenCode `run --format json` event logs (one JSON object per line).
// ABOUTME: Replays recorded runs through a session context so dedup and dispatch match a live turn.

use crate::backends::opencode::OpencodeAdapter;
use crate::context::SessionContext;
use crate::coordinator::{ContentChunk, ContentKind, Signal};
use crate::event::{ErrorData, EventPayload, TurnCompleteData};
use crate::message::NormalizedMessage;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One line of a run-event log
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Text {
        #[serde(default)]
        part: ContentPart,
    },
    #[serde(alias = "reasoning")]
    Thinking {
        #[serde(default)]
        part: ContentPart,
    },
    ToolUse {
        #[serde(default)]
        part: ToolPart,
    },
    StepStart {
        #[serde(default)]
        part: Value,
    },
    StepFinish {
        #[serde(default)]
        part: StepPart,
    },
    Error {
        #[serde(default)]
        error: RunError,
    },
    SessionStart,
    SessionEnd,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "messageID", default)]
    pub message_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolPart {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "callID", default)]
    pub call_id: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub state: RunToolState,
}

impl ToolPart {
    fn call_id(&self) -> &str {
        if self.call_id.is_empty() {
            &self.id
        } else {
            &self.call_id
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunToolState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepPart {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl RunError {
    /// "Name: message", falling back to "Error" and the raw data
    pub fn describe(&self) -> String {
        let name = self.name.as_deref().unwrap_or("Error");
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.data.to_string());
        format!("{}: {}", name, message)
    }
}

/// What a replayed log produced
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub messages: Vec<NormalizedMessage>,
    pub errors: Vec<String>,
    /// Lines that were not valid run events
    pub malformed: usize,
    pub stop_reason: Option<String>,
}

/// Feeds run-event lines through a session context
pub struct Replayer {
    ctx: SessionContext,
    outcome: ReplayOutcome,
    line_no: usize,
}

impl Replayer {
    /// The context gets the same semantic tool routing as a live OpenCode session
    pub fn new(ctx: SessionContext) -> Self {
        ctx.install_semantic_tools(OpencodeAdapter::semantic_tools());
        ctx.begin_turn();
        Self {
            ctx,
            outcome: ReplayOutcome::default(),
            line_no: 0,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Decode one line. Blank lines are skipped, malformed ones are counted
    /// and logged. Returns the messages the line produced.
    pub fn feed_line(&mut self, line: &str) -> Vec<NormalizedMessage> {
        self.line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => self.apply(event),
            Err(e) => {
                tracing::warn!(line = self.line_no, error = %e, "Skipping malformed run event");
                self.outcome.malformed += 1;
                Vec::new()
            }
        }
    }

    pub fn apply(&mut self, event: RunEvent) -> Vec<NormalizedMessage> {
        let signals = match event {
            RunEvent::Text { part } => {
                vec![Signal::Text(ContentChunk::for_message(
                    ContentKind::Text,
                    non_empty(part.message_id),
                    part.text,
                ))]
            }
            RunEvent::Thinking { part } => {
                vec![Signal::Thinking(ContentChunk::for_message(
                    ContentKind::Thinking,
                    non_empty(part.message_id),
                    part.text,
                ))]
            }
            RunEvent::ToolUse { part } => tool_signals(part),
            RunEvent::StepStart { .. } => {
                tracing::trace!(line = self.line_no, "Step started");
                Vec::new()
            }
            RunEvent::StepFinish { part } => {
                if let Some(reason) = part.reason {
                    self.ctx.set_stop_reason(reason);
                }
                Vec::new()
            }
            RunEvent::Error { error } => {
                let message = error.describe();
                self.ctx.emit(EventPayload::Error(ErrorData {
                    message: message.clone(),
                    aborted: false,
                }));
                self.outcome.errors.push(message);
                Vec::new()
            }
            RunEvent::SessionStart | RunEvent::SessionEnd => {
                tracing::debug!(line = self.line_no, "Session boundary in run log");
                Vec::new()
            }
            RunEvent::Other => Vec::new(),
        };

        let produced: Vec<NormalizedMessage> = signals
            .into_iter()
            .filter_map(|signal| self.ctx.ingest(signal))
            .collect();
        self.outcome.messages.extend(produced.iter().cloned());
        produced
    }

    /// Close the replay. A log without errors counts as a completed turn.
    pub fn finish(mut self) -> ReplayOutcome {
        self.outcome.stop_reason = self.ctx.take_stop_reason();
        if self.outcome.errors.is_empty() {
            self.ctx.emit(EventPayload::TurnComplete(TurnCompleteData {
                stop_reason: self.outcome.stop_reason.clone(),
                messages: self.outcome.messages.len(),
            }));
        }
        self.outcome
    }
}

/// Replay a whole log from an async reader
pub async fn replay_reader<R>(ctx: SessionContext, reader: R) -> Result<ReplayOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut replayer = Replayer::new(ctx);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read run log")? {
        replayer.feed_line(&line);
    }
    Ok(replayer.finish())
}

fn tool_signals(part: ToolPart) -> Vec<Signal> {
    let call_id = part.call_id().to_string();
    if call_id.is_empty() {
        tracing::warn!(tool = %part.tool, "Tool event without an id, skipping");
        return Vec::new();
    }
    let mut input = part.state.input;
    if let (Some(title), Value::Object(map)) = (&part.state.title, &mut input) {
        map.entry("title").or_insert_with(|| Value::String(title.clone()));
    }
    let start = Signal::ToolStart {
        call_id: call_id.clone(),
        name: part.tool.clone(),
        input,
    };
    match part.state.status.as_str() {
        "completed" => vec![
            start,
            Signal::ToolEnd {
                call_id,
                name: Some(part.tool),
                success: true,
                output: part.state.output,
                error: None,
            },
        ],
        "error" => vec![
            start,
            Signal::ToolEnd {
                call_id,
                name: Some(part.tool),
                success: false,
                output: part.state.output,
                error: part.state.error.or_else(|| Some("tool failed".to_string())),
            },
        ],
        _ => vec![start],
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_describe_uses_data_message() {
        let error: RunError =
            serde_json::from_str(r#"{"name":"APIError","data":{"message":"rate limited"}}"#).unwrap();
        assert_eq!(error.describe(), "APIError: rate limited");
    }

    #[test]
    fn test_error_describe_without_name_or_message() {
        let error: RunError = serde_json::from_str(r#"{"data":{"code":7}}"#).unwrap();
        assert_eq!(error.describe(), r#"Error: {"code":7}"#);
    }

    #[test]
    fn test_reasoning_is_an_alias_for_thinking() {
        let event: RunEvent =
            serde_json::from_str(r#"{"type":"reasoning","part":{"text":"hmm"}}"#).unwrap();
        assert!(matches!(event, RunEvent::Thinking { part } if part.text == "hmm"));
    }

    #[test]
    fn test_unknown_type_is_other() {
        let event: RunEvent = serde_json::from_str(r#"{"type":"snapshot","part":{}}"#).unwrap();
        assert!(matches!(event, RunEvent::Other));
    }

    #[test]
    fn test_running_tool_has_no_end() {
        let part: ToolPart = serde_json::from_value(serde_json::json!({
            "id": "prt_1",
            "tool": "bash",
            "state": {"status": "running", "input": {"command": "ls"}}
        }))
        .unwrap();
        let signals = tool_signals(part);
        assert_eq!(signals.len(), 1);
        assert!(matches!(&signals[0], Signal::ToolStart { call_id, .. } if call_id == "prt_1"));
    }
}
