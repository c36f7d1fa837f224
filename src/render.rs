// ABOUTME: Formats normalized messages and session events for a terminal.
// ABOUTME: Text streams inline; tools, subagents, skills and questions get prefixed lines.

use prism_agent::event::{AgentEvent, EventPayload, SkillStatus};
use prism_agent::message::{MessageContent, MessageKind, NormalizedMessage};
use prism_agent::TurnError;
use serde_json::Value;
use std::io::Write;
use std::sync::Mutex;

const SUMMARY_CHARS: usize = 80;

/// One piece of terminal output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Continues the current line
    Inline(String),
    /// Printed on a line of its own
    Line(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    pub show_thinking: bool,
}

impl Renderer {
    pub fn message(&self, message: &NormalizedMessage) -> Option<Fragment> {
        match message.kind {
            MessageKind::Text => message
                .as_text()
                .filter(|t| !t.is_empty())
                .map(|t| Fragment::Inline(t.to_string())),
            MessageKind::Thinking if self.show_thinking => message
                .as_text()
                .filter(|t| !t.trim().is_empty())
                .map(|t| Fragment::Line(format!("[thinking] {}", summarize(t)))),
            MessageKind::Thinking => None,
            MessageKind::ToolUse => {
                let name = metadata_str(message, "toolName").unwrap_or("tool");
                let input = match &message.content {
                    MessageContent::Structured(Value::Null) => String::new(),
                    MessageContent::Structured(value) => summarize(&value.to_string()),
                    MessageContent::Text(text) => summarize(text),
                };
                Some(Fragment::Line(format!("[tool] {} {}", name, input).trim_end().to_string()))
            }
            MessageKind::ToolResult => {
                let name = metadata_str(message, "toolName").unwrap_or("tool");
                let is_error = message
                    .metadata
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if is_error {
                    let detail = match &message.content {
                        MessageContent::Structured(Value::String(s)) => summarize(s),
                        MessageContent::Structured(value) => summarize(&value.to_string()),
                        MessageContent::Text(text) => summarize(text),
                    };
                    Some(Fragment::Line(format!("[tool] {} failed: {}", name, detail)))
                } else {
                    Some(Fragment::Line(format!("[tool] {} done", name)))
                }
            }
        }
    }
}

/// Line for the events a turn stream does not carry
pub fn event_line(event: &AgentEvent) -> Option<String> {
    match &event.payload {
        EventPayload::SubagentStart(data) => {
            let label = data.subagent_type.as_deref().unwrap_or(&data.subagent_id);
            Some(match data.description.as_deref().filter(|d| !d.is_empty()) {
                Some(description) => {
                    format!("[subagent] {} started: {}", label, summarize(description))
                }
                None => format!("[subagent] {} started", label),
            })
        }
        EventPayload::SubagentComplete(data) if data.success => {
            Some(format!("[subagent] {} finished", data.subagent_id))
        }
        EventPayload::SubagentComplete(data) => Some(format!(
            "[subagent] {} failed: {}",
            data.subagent_id,
            data.error.as_deref().unwrap_or("unknown error")
        )),
        EventPayload::SkillInvoked(data) => {
            let status = match data.status {
                SkillStatus::Loading => "loading",
                SkillStatus::Loaded => "loaded",
                SkillStatus::Error => "failed",
            };
            Some(format!("[skill] {} {}", data.name, status))
        }
        EventPayload::QuestionAsked(data) => {
            let question = data
                .input
                .get("question")
                .and_then(Value::as_str)
                .map(summarize)
                .unwrap_or_else(|| data.question_id.clone());
            Some(format!("[question] {}", question))
        }
        _ => None,
    }
}

pub fn stopped_early(error: &TurnError) -> String {
    format!("stopped early: {}", error)
}

/// Single line, at most `SUMMARY_CHARS` characters
pub fn summarize(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SUMMARY_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(SUMMARY_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn metadata_str<'a>(message: &'a NormalizedMessage, key: &str) -> Option<&'a str> {
    message.metadata.get(key).and_then(Value::as_str)
}

/// Shared writer that keeps inline text and prefixed lines from running together.
/// Handlers and the stream consumer write through the same terminal.
pub struct Terminal<W: Write> {
    state: Mutex<TerminalState<W>>,
}

struct TerminalState<W> {
    out: W,
    mid_line: bool,
}

impl<W: Write> Terminal<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(TerminalState {
                out,
                mid_line: false,
            }),
        }
    }

    pub fn write(&self, fragment: &Fragment) {
        match fragment {
            Fragment::Inline(text) => self.inline(text),
            Fragment::Line(line) => self.line(line),
        }
    }

    pub fn inline(&self, text: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = write!(state.out, "{}", text).and_then(|_| state.out.flush()) {
            tracing::debug!(error = %e, "Terminal write failed");
            return;
        }
        state.mid_line = !text.ends_with('\n');
    }

    pub fn line(&self, line: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let result = if state.mid_line {
            writeln!(state.out)
        } else {
            Ok(())
        }
        .and_then(|_| writeln!(state.out, "{}", line))
        .and_then(|_| state.out.flush());
        if let Err(e) = result {
            tracing::debug!(error = %e, "Terminal write failed");
        }
        state.mid_line = false;
    }

    /// End any open inline line
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.mid_line {
            if let Err(e) = writeln!(state.out).and_then(|_| state.out.flush()) {
                tracing::debug!(error = %e, "Terminal write failed");
            }
            state.mid_line = false;
        }
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().unwrap_or_else(|e| e.into_inner()).out
    }
}
