// ABOUTME: Hook/callback-replay adapter for Claude Code's stream-json protocol.
// ABOUTME: Subagent lifecycle comes from SubagentStart/SubagentStop hooks, text from content-block deltas.

use crate::adapter::{Adapter, BackendKind, TurnError, TurnStream};
use crate::bridge::{self, PushError, PushSender, DEFAULT_CAPACITY};
use crate::context::SessionContext;
use crate::coordinator::{ContentChunk, ContentKind, KeySource, OccurrenceKind, SemanticTools, Signal};
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One line of Claude Code's stream-json output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkMessage {
    StreamEvent {
        event: StreamEvent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    User {
        message: UserMessage,
    },
    Result {
        subtype: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Anthropic streaming event nested inside `stream_event`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        #[serde(default)]
        content_block: Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: Value,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStart {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// User turns echo tool results; plain string content is ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Value,
}

impl UserMessage {
    pub fn blocks(&self) -> Vec<ContentBlock> {
        let Some(items) = self.content.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(block) => Some(block),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed user content block");
                    None
                }
            })
            .collect()
    }
}

/// `SubagentStart` hook input. Missing fields degrade to empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubagentStartInput {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `SubagentStop` hook input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubagentStopInput {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Reply to a hook callback: `{"continue": true}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookAck {
    #[serde(rename = "continue")]
    pub proceed: bool,
}

impl HookAck {
    pub fn proceed() -> Self {
        Self { proceed: true }
    }
}

/// One method per hook kind. Called on the transport's reader; must return
/// without waiting on anything, or the backend session stalls.
pub trait HookCallbacks: Send + Sync {
    fn subagent_start(&self, input: &SubagentStartInput) -> HookAck;
    fn subagent_stop(&self, input: &SubagentStopInput) -> HookAck;
}

/// Wire access to a Claude Code process
pub trait ClaudeTransport: Send + Sync {
    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;

    /// Send a user prompt. The stream ends after the `result` message, or
    /// early if the process goes away.
    fn query<'a>(
        &'a self,
        prompt: &'a str,
        hooks: Arc<dyn HookCallbacks>,
    ) -> BoxFuture<'a, Result<BoxStream<'a, SdkMessage>>>;

    fn interrupt<'a>(&'a self) -> BoxFuture<'a, Result<()>>;

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

/// Hook callbacks that only enqueue; translation happens in the turn loop
struct HookBridge {
    tx: PushSender<Signal>,
}

impl HookBridge {
    fn push(&self, signal: Signal) {
        match self.tx.push(signal) {
            Ok(()) => {}
            Err(PushError::Full(signal)) => {
                tracing::warn!(?signal, "Hook bridge full, dropping hook signal");
            }
            Err(PushError::Closed(_)) => {
                tracing::debug!("Hook fired after turn ended");
            }
        }
    }
}

impl HookCallbacks for HookBridge {
    fn subagent_start(&self, input: &SubagentStartInput) -> HookAck {
        self.push(Signal::SubagentStart {
            id: input.agent_id.clone(),
            subagent_type: Some(input.agent_type.clone()),
            description: None,
        });
        HookAck::proceed()
    }

    fn subagent_stop(&self, input: &SubagentStopInput) -> HookAck {
        // The stop hook has no failure field; success is best-effort
        self.push(Signal::SubagentEnd {
            id: input.agent_id.clone(),
            success: true,
            result: None,
            error: None,
        });
        HookAck::proceed()
    }
}

/// Per-turn translation state
#[derive(Debug, Default)]
struct Translator {
    message_id: Option<String>,
}

impl Translator {
    fn translate(&mut self, message: SdkMessage) -> Vec<Signal> {
        match message {
            SdkMessage::StreamEvent { event, .. } => match event {
                StreamEvent::MessageStart { message } => {
                    self.message_id = Some(message.id);
                    Vec::new()
                }
                StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                    ContentDelta::TextDelta { text } => vec![Signal::TextDelta(
                        ContentChunk::for_message(ContentKind::Text, self.message_id.clone(), text),
                    )],
                    ContentDelta::ThinkingDelta { thinking } => vec![Signal::ThinkingDelta(
                        ContentChunk::for_message(ContentKind::Thinking, self.message_id.clone(), thinking),
                    )],
                    // Tool input is taken whole from the assistant message
                    ContentDelta::InputJsonDelta { .. } | ContentDelta::Other => Vec::new(),
                },
                _ => Vec::new(),
            },
            SdkMessage::Assistant { message } => {
                let id = message.id.or_else(|| self.message_id.clone());
                message
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => {
                            Some(Signal::Text(ContentChunk::for_message(
                                ContentKind::Text,
                                id.clone(),
                                text,
                            )))
                        }
                        ContentBlock::Thinking { thinking } => Some(Signal::Thinking(
                            ContentChunk::for_message(ContentKind::Thinking, id.clone(), thinking),
                        )),
                        ContentBlock::ToolUse { id, name, input } => Some(Signal::ToolStart {
                            call_id: id,
                            name,
                            input,
                        }),
                        _ => None,
                    })
                    .collect()
            }
            SdkMessage::User { message } => message
                .blocks()
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let text = tool_result_text(&content);
                        Some(Signal::ToolEnd {
                            call_id: tool_use_id,
                            name: None,
                            success: !is_error,
                            output: Some(content),
                            error: is_error.then_some(text),
                        })
                    }
                    _ => None,
                })
                .collect(),
            SdkMessage::Result { .. } | SdkMessage::System { .. } | SdkMessage::Other => Vec::new(),
        }
    }
}

/// Tool result content is either a string or a list of text blocks
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

enum Step {
    Abort,
    Hook(Option<Signal>),
    Message(Option<SdkMessage>),
}

pub struct ClaudeAdapter {
    ctx: SessionContext,
    transport: Box<dyn ClaudeTransport>,
}

impl ClaudeAdapter {
    pub fn new(ctx: SessionContext, transport: Box<dyn ClaudeTransport>) -> Self {
        ctx.install_semantic_tools(Self::semantic_tools());
        Self { ctx, transport }
    }

    /// Task runs are reported by the subagent hooks, so the generic tool is
    /// dropped rather than folded
    pub fn semantic_tools() -> SemanticTools {
        SemanticTools::new()
            .route("Task", OccurrenceKind::Subagent, KeySource::ChannelOnly)
            .route("Skill", OccurrenceKind::Skill, KeySource::InputField("skill"))
            .route("AskUserQuestion", OccurrenceKind::Question, KeySource::CallId)
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::AdapterFactory {
        Box::new(|config, ctx| {
            let cfg: super::claude_cli::ClaudeCliConfig = serde_json::from_value(config.clone())
                .context("Invalid claude backend config")?;
            let transport = super::claude_cli::ClaudeCliTransport::new(cfg);
            Ok(Box::new(ClaudeAdapter::new(ctx, Box::new(transport))) as Box<dyn Adapter>)
        })
    }
}

impl Adapter for ClaudeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
    }

    fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        self.transport.connect()
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        self.transport.close()
    }

    fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a> {
        let ctx = &self.ctx;
        let transport = &self.transport;

        Box::pin(async_stream::stream! {
            ctx.begin_turn();
            let (tx, mut hooks) = bridge::channel::<Signal>(DEFAULT_CAPACITY);
            let callbacks: Arc<dyn HookCallbacks> = Arc::new(HookBridge { tx });

            let query = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                result = transport.query(prompt, callbacks) => Some(result),
            };
            let mut messages = match query {
                None => {
                    yield Err(TurnError::Aborted { incomplete: Vec::new() });
                    return;
                }
                Some(Err(e)) => {
                    tracing::error!(session_id = %ctx.session_id(), error = %e, "Claude query failed");
                    yield Err(TurnError::ConnectionLost(format!("{:#}", e)));
                    return;
                }
                Some(Ok(messages)) => messages,
            };

            let mut translator = Translator::default();
            let mut hooks_open = true;

            loop {
                let step = tokio::select! {
                    biased;
                    _ = abort.cancelled() => Step::Abort,
                    signal = hooks.recv(), if hooks_open => Step::Hook(signal),
                    message = messages.next() => Step::Message(message),
                };

                match step {
                    Step::Abort => {
                        if let Err(e) = transport.interrupt().await {
                            tracing::warn!(error = %e, "Failed to interrupt Claude");
                        }
                        yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                        return;
                    }
                    Step::Hook(None) => hooks_open = false,
                    Step::Hook(Some(signal)) => {
                        if let Some(message) = ctx.ingest(signal) {
                            yield Ok(message);
                        }
                    }
                    Step::Message(None) => {
                        tracing::warn!(session_id = %ctx.session_id(), "Claude stream ended without a result");
                        yield Err(TurnError::ConnectionLost("stream ended before result".to_string()));
                        return;
                    }
                    Step::Message(Some(SdkMessage::Result { subtype, is_error, result, .. })) => {
                        // Hooks fired before the result belong to this turn
                        while let Some(signal) = hooks.try_recv() {
                            if let Some(message) = ctx.ingest(signal) {
                                yield Ok(message);
                            }
                        }
                        ctx.set_stop_reason(subtype.clone());
                        if is_error {
                            yield Err(TurnError::Backend(result.unwrap_or(subtype)));
                        }
                        return;
                    }
                    Step::Message(Some(message)) => {
                        for signal in translator.translate(message) {
                            if let Some(message) = ctx.ingest(signal) {
                                yield Ok(message);
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Input a hook script receives on standard input from the surrounding
/// orchestration. Only the fields every hook shares are typed.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    pub timestamp: Value,
    pub cwd: String,
    /// Value of `reason` or, failing that, `source`
    pub trigger: String,
    pub extra: Map<String, Value>,
}

impl HookInput {
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).context("Hook input is not JSON")?;
        let Value::Object(mut fields) = value else {
            bail!("Hook input must be a JSON object");
        };

        let timestamp = fields
            .remove("timestamp")
            .filter(|v| !v.is_null())
            .context("Hook input is missing timestamp")?;
        let cwd = match fields.remove("cwd") {
            Some(Value::String(cwd)) => cwd,
            _ => bail!("Hook input is missing cwd"),
        };
        let trigger = ["reason", "source"]
            .iter()
            .find_map(|k| fields.get(*k).and_then(|v| v.as_str()).map(str::to_string))
            .context("Hook input has neither reason nor source")?;

        Ok(Self {
            timestamp,
            cwd,
            trigger,
            extra: fields,
        })
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut buf = String::new();
        reader
            .read_to_string(&mut buf)
            .context("Failed to read hook input")?;
        Self::parse(&buf)
    }
}
