// ABOUTME: Pure push adapter for the GitHub Copilot CLI server.
// ABOUTME: Every signal arrives by callback; a bridge turns them into one pull loop per turn.

use crate::adapter::{Adapter, BackendKind, TurnError, TurnStream};
use crate::bridge::{self, PushError, DEFAULT_CAPACITY};
use crate::context::SessionContext;
use crate::coordinator::{ContentChunk, ContentKind, KeySource, OccurrenceKind, SemanticTools, Signal};
use crate::event::SkillStatus;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Raw session event as delivered by `session.event` notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl CopilotEvent {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeltaData {
    #[serde(default)]
    pub message_id: String,
    pub delta_content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningDeltaData {
    #[serde(default)]
    pub reasoning_id: String,
    pub delta_content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningData {
    #[serde(default)]
    pub reasoning_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartData {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompleteData {
    pub tool_call_id: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentStartedData {
    pub tool_call_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub agent_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentCompletedData {
    pub tool_call_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentFailedData {
    pub tool_call_id: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInvokedData {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

/// The subset of session events that matter to a turn
#[derive(Debug, Clone, PartialEq)]
pub enum CopilotEventKind {
    MessageDelta(MessageDeltaData),
    Message(MessageData),
    ReasoningDelta(ReasoningDeltaData),
    Reasoning(ReasoningData),
    ToolStart(ToolStartData),
    ToolComplete(ToolCompleteData),
    SubagentStarted(SubagentStartedData),
    SubagentCompleted(SubagentCompletedData),
    SubagentFailed(SubagentFailedData),
    SkillInvoked(SkillInvokedData),
    SessionIdle,
    SessionError(SessionErrorData),
    Abort,
    Ignored,
}

impl CopilotEvent {
    /// Typed view of the event. A known type with malformed data is an error;
    /// unknown types are `Ignored`.
    pub fn kind(&self) -> std::result::Result<CopilotEventKind, serde_json::Error> {
        let data = self.data.clone();
        Ok(match self.event_type.as_str() {
            "assistant.message_delta" => CopilotEventKind::MessageDelta(serde_json::from_value(data)?),
            "assistant.message" => CopilotEventKind::Message(serde_json::from_value(data)?),
            "assistant.reasoning_delta" => {
                CopilotEventKind::ReasoningDelta(serde_json::from_value(data)?)
            }
            "assistant.reasoning" => CopilotEventKind::Reasoning(serde_json::from_value(data)?),
            "tool.execution_start" => CopilotEventKind::ToolStart(serde_json::from_value(data)?),
            "tool.execution_complete" => CopilotEventKind::ToolComplete(serde_json::from_value(data)?),
            "subagent.started" | "custom_agent.started" => {
                CopilotEventKind::SubagentStarted(serde_json::from_value(data)?)
            }
            "subagent.completed" | "custom_agent.completed" => {
                CopilotEventKind::SubagentCompleted(serde_json::from_value(data)?)
            }
            "subagent.failed" | "custom_agent.failed" => {
                CopilotEventKind::SubagentFailed(serde_json::from_value(data)?)
            }
            "skill.invoked" => CopilotEventKind::SkillInvoked(serde_json::from_value(data)?),
            "session.idle" => CopilotEventKind::SessionIdle,
            "session.error" => CopilotEventKind::SessionError(serde_json::from_value(data)?),
            "abort" => CopilotEventKind::Abort,
            _ => CopilotEventKind::Ignored,
        })
    }
}

/// Subscriber callback. Called on the transport's reader; must not block.
pub type EventCallback = Arc<dyn Fn(CopilotEvent) + Send + Sync>;

/// Wire access to a Copilot CLI server
pub trait CopilotTransport: Send + Sync {
    /// Start the server if needed and open a session
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>>;

    fn subscribe(&self, session_id: &str, callback: EventCallback) -> u64;

    fn unsubscribe(&self, subscription: u64);

    /// Submit a prompt; events for it arrive through subscriptions
    fn send<'a>(&'a self, session_id: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<()>>;

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn destroy<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Removes the turn's callback however the turn ends
struct CallbackGuard<'a> {
    transport: &'a dyn CopilotTransport,
    subscription: u64,
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.subscription);
    }
}

/// Translate one event into signals. Text and reasoning use the turn-wide
/// delta flag: once any delta streamed this turn, materialized copies are
/// dropped, including after tool round-trips.
fn translate(kind: CopilotEventKind) -> Vec<Signal> {
    match kind {
        CopilotEventKind::MessageDelta(d) => vec![Signal::TextDelta(ContentChunk::for_turn(
            ContentKind::Text,
            Some(d.message_id),
            d.delta_content,
        ))],
        CopilotEventKind::Message(d) => vec![Signal::Text(ContentChunk::for_turn(
            ContentKind::Text,
            Some(d.message_id),
            d.content,
        ))],
        CopilotEventKind::ReasoningDelta(d) => vec![Signal::ThinkingDelta(ContentChunk::for_turn(
            ContentKind::Thinking,
            Some(d.reasoning_id),
            d.delta_content,
        ))],
        CopilotEventKind::Reasoning(d) => vec![Signal::Thinking(ContentChunk::for_turn(
            ContentKind::Thinking,
            Some(d.reasoning_id),
            d.content,
        ))],
        CopilotEventKind::ToolStart(d) => vec![Signal::ToolStart {
            call_id: d.tool_call_id,
            name: d.tool_name,
            input: d.arguments,
        }],
        CopilotEventKind::ToolComplete(d) => {
            let error = d.error.map(|e| match e {
                Value::String(s) => s,
                other => other
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            });
            let output = d.result.map(|r| match r.get("content") {
                Some(content) => content.clone(),
                None => r,
            });
            vec![Signal::ToolEnd {
                call_id: d.tool_call_id,
                name: None,
                success: d.success,
                output,
                error,
            }]
        }
        CopilotEventKind::SubagentStarted(d) => vec![Signal::SubagentStart {
            id: d.tool_call_id,
            subagent_type: Some(d.agent_name),
            description: d.agent_description,
        }],
        CopilotEventKind::SubagentCompleted(d) => vec![Signal::SubagentEnd {
            id: d.tool_call_id,
            success: true,
            result: None,
            error: None,
        }],
        CopilotEventKind::SubagentFailed(d) => vec![Signal::SubagentEnd {
            id: d.tool_call_id,
            success: false,
            result: None,
            error: Some(d.error),
        }],
        CopilotEventKind::SkillInvoked(d) => vec![Signal::Skill {
            name: d.name,
            status: SkillStatus::Loaded,
            path: d.path,
            description: None,
        }],
        CopilotEventKind::SessionIdle
        | CopilotEventKind::SessionError(_)
        | CopilotEventKind::Abort
        | CopilotEventKind::Ignored => Vec::new(),
    }
}

enum Step {
    Abort,
    Event(Option<CopilotEvent>),
}

pub struct CopilotAdapter {
    ctx: SessionContext,
    transport: Box<dyn CopilotTransport>,
    session: Mutex<Option<String>>,
}

impl CopilotAdapter {
    pub fn new(ctx: SessionContext, transport: Box<dyn CopilotTransport>) -> Self {
        ctx.install_semantic_tools(Self::semantic_tools());
        Self {
            ctx,
            transport,
            session: Mutex::new(None),
        }
    }

    /// `subagent.*` events share the task tool's call id and `skill.invoked`
    /// shares the skill tool's `skill` argument, so both channels fold into
    /// one occurrence
    pub fn semantic_tools() -> SemanticTools {
        SemanticTools::new()
            .route("task", OccurrenceKind::Subagent, KeySource::CallId)
            .route("skill", OccurrenceKind::Skill, KeySource::InputField("skill"))
            .route("ask_user", OccurrenceKind::Question, KeySource::CallId)
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::AdapterFactory {
        Box::new(|config, ctx| {
            let cfg: super::copilot_rpc::CopilotConfig = serde_json::from_value(config.clone())
                .context("Invalid copilot backend config")?;
            let transport = super::copilot_rpc::CopilotRpcTransport::new(cfg);
            Ok(Box::new(CopilotAdapter::new(ctx, Box::new(transport))) as Box<dyn Adapter>)
        })
    }

    pub fn backend_session(&self) -> Option<String> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Adapter for CopilotAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Copilot
    }

    fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let session_id = self
                .transport
                .create_session()
                .await
                .context("Failed to create Copilot session")?;
            tracing::info!(session_id = %self.ctx.session_id(), backend_session = %session_id, "Copilot session created");
            *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session_id);
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let session = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(session_id) = session {
                self.transport
                    .destroy(&session_id)
                    .await
                    .context("Failed to destroy Copilot session")?;
            }
            Ok(())
        })
    }

    fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a> {
        let ctx = &self.ctx;
        let transport: &'a dyn CopilotTransport = self.transport.as_ref();

        Box::pin(async_stream::stream! {
            ctx.begin_turn();
            let Some(session_id) = self.backend_session() else {
                yield Err(TurnError::NotConnected);
                return;
            };

            // Register before sending: anything pushed ahead of the first
            // pull waits in the bridge
            let (tx, mut events) = bridge::channel::<CopilotEvent>(DEFAULT_CAPACITY);
            let callback: EventCallback = Arc::new(move |event| match tx.push(event) {
                Ok(()) => {}
                Err(PushError::Full(event)) => {
                    tracing::warn!(event_type = %event.event_type, "Copilot bridge full, dropping event");
                }
                Err(PushError::Closed(_)) => {}
            });
            let _guard = CallbackGuard {
                transport,
                subscription: transport.subscribe(&session_id, callback),
            };

            let sent = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                result = transport.send(&session_id, prompt) => Some(result),
            };
            match sent {
                None => {
                    if let Err(e) = transport.abort(&session_id).await {
                        tracing::warn!(error = %e, "Failed to abort Copilot session");
                    }
                    yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                    return;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Copilot send failed");
                    yield Err(TurnError::ConnectionLost(format!("{:#}", e)));
                    return;
                }
                Some(Ok(())) => {}
            }

            loop {
                let step = tokio::select! {
                    biased;
                    _ = abort.cancelled() => Step::Abort,
                    event = events.recv() => Step::Event(event),
                };

                let event = match step {
                    Step::Abort => {
                        if let Err(e) = transport.abort(&session_id).await {
                            tracing::warn!(error = %e, "Failed to abort Copilot session");
                        }
                        yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                        return;
                    }
                    Step::Event(None) => {
                        yield Err(TurnError::ConnectionLost("Copilot event subscription closed".to_string()));
                        return;
                    }
                    Step::Event(Some(event)) => event,
                };

                let kind = match event.kind() {
                    Ok(kind) => kind,
                    Err(e) => {
                        tracing::warn!(event_type = %event.event_type, error = %e, "Skipping malformed Copilot event");
                        continue;
                    }
                };

                match kind {
                    CopilotEventKind::SessionIdle => {
                        ctx.set_stop_reason("idle");
                        return;
                    }
                    CopilotEventKind::SessionError(e) => {
                        yield Err(TurnError::Backend(format!("{}: {}", e.error_type, e.message)));
                        return;
                    }
                    CopilotEventKind::Abort => {
                        yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                        return;
                    }
                    kind => {
                        for signal in translate(kind) {
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
