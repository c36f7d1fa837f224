// ABOUTME: Dual-source adapter for an OpenCode server: direct prompt response plus SSE event feed.
// ABOUTME: Feed deltas win per message id; the materialized response fills in whatever the feed missed.

use crate::adapter::{Adapter, BackendKind, TurnError, TurnStream};
use crate::context::SessionContext;
use crate::coordinator::{ContentChunk, ContentKind, KeySource, OccurrenceKind, SemanticTools, Signal};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_IDLE_GRACE_MS: u64 = 1500;

/// One frame of the server's `/event` feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    #[serde(rename = "message.part.updated")]
    PartUpdated { properties: PartUpdated },
    #[serde(rename = "session.idle")]
    SessionIdle { properties: SessionRef },
    #[serde(rename = "session.error")]
    SessionError { properties: SessionErrorProps },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUpdated {
    pub part: Part,
    /// Text appended to a text or reasoning part by this update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionErrorProps {
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl SessionErrorProps {
    pub fn message(&self) -> String {
        let Some(error) = &self.error else {
            return "unknown session error".to_string();
        };
        error
            .pointer("/data/message")
            .or_else(|| error.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| error.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .unwrap_or_else(|| error.to_string())
    }
}

/// Identity shared by every part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartRef {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
    #[serde(rename = "messageID", default)]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        #[serde(flatten)]
        at: PartRef,
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(flatten)]
        at: PartRef,
        #[serde(default)]
        text: String,
    },
    Tool {
        #[serde(flatten)]
        at: PartRef,
        #[serde(rename = "callID")]
        call_id: String,
        tool: String,
        state: ToolState,
    },
    /// Sub-agent start. A part with no id or name degrades to empty strings.
    Agent {
        #[serde(flatten)]
        at: PartRef,
        #[serde(default)]
        name: String,
    },
    StepStart {
        #[serde(flatten)]
        at: PartRef,
    },
    StepFinish {
        #[serde(flatten)]
        at: PartRef,
        #[serde(default)]
        reason: String,
    },
    #[serde(other)]
    Other,
}

impl Part {
    pub fn at(&self) -> Option<&PartRef> {
        match self {
            Part::Text { at, .. }
            | Part::Reasoning { at, .. }
            | Part::Tool { at, .. }
            | Part::Agent { at, .. }
            | Part::StepStart { at }
            | Part::StepFinish { at, .. } => Some(at),
            Part::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    Pending {
        #[serde(default)]
        input: Value,
    },
    Running {
        #[serde(default)]
        input: Value,
    },
    Completed {
        #[serde(default)]
        input: Value,
        #[serde(default)]
        output: String,
    },
    Error {
        #[serde(default)]
        input: Value,
        #[serde(default)]
        error: String,
    },
}

/// Reply of `POST /session/{id}/message`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl PromptResponse {
    /// Parts that parse; malformed ones are logged and skipped
    pub fn parts(&self) -> Vec<Part> {
        self.parts
            .iter()
            .filter_map(|raw| match serde_json::from_value::<Part>(raw.clone()) {
                Ok(part) => Some(part),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed OpenCode part");
                    None
                }
            })
            .collect()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.info.get("id").and_then(|v| v.as_str())
    }
}

/// Wire access to an OpenCode server
pub trait OpencodeTransport: Send + Sync {
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>>;

    /// Open the server-push feed. Frames that fail to decode are skipped.
    fn subscribe<'a>(&'a self) -> BoxFuture<'a, Result<BoxStream<'a, FeedEvent>>>;

    fn prompt<'a>(
        &'a self,
        session_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<PromptResponse>>;

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Whether content came incrementally from the feed or whole from the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Feed,
    Response,
}

/// Per-turn part translation
#[derive(Debug, Default)]
struct Translator {
    open_agents: Vec<String>,
    seen_parts: HashSet<String>,
}

impl Translator {
    fn translate(&mut self, part: Part, delta: Option<String>, source: Source) -> Vec<Signal> {
        match part {
            Part::Text { at, text } => content(
                ContentKind::Text,
                at,
                text,
                delta,
                source,
                Signal::TextDelta,
                Signal::Text,
            ),
            Part::Reasoning { at, text } => content(
                ContentKind::Thinking,
                at,
                text,
                delta,
                source,
                Signal::ThinkingDelta,
                Signal::Thinking,
            ),
            Part::Tool {
                call_id,
                tool,
                state,
                ..
            } => match state {
                ToolState::Pending { .. } => Vec::new(),
                ToolState::Running { input } => vec![Signal::ToolStart {
                    call_id,
                    name: tool,
                    input,
                }],
                ToolState::Completed { input, output } => vec![
                    Signal::ToolStart {
                        call_id: call_id.clone(),
                        name: tool.clone(),
                        input,
                    },
                    Signal::ToolEnd {
                        call_id,
                        name: Some(tool),
                        success: true,
                        output: Some(Value::String(output)),
                        error: None,
                    },
                ],
                ToolState::Error { input, error } => vec![
                    Signal::ToolStart {
                        call_id: call_id.clone(),
                        name: tool.clone(),
                        input,
                    },
                    Signal::ToolEnd {
                        call_id,
                        name: Some(tool),
                        success: false,
                        output: None,
                        error: Some(error),
                    },
                ],
            },
            Part::Agent { at, name } => {
                if !self.first_sighting(&at, "agent") {
                    return Vec::new();
                }
                self.open_agents.push(at.id.clone());
                vec![Signal::SubagentStart {
                    id: at.id,
                    subagent_type: Some(name),
                    description: None,
                }]
            }
            Part::StepFinish { at, reason } => {
                if !self.first_sighting(&at, "step-finish") {
                    return Vec::new();
                }
                let Some(id) = self.open_agents.pop() else {
                    return Vec::new();
                };
                let success = reason != "error";
                vec![Signal::SubagentEnd {
                    id,
                    success,
                    result: None,
                    error: (!success).then_some(reason),
                }]
            }
            Part::StepStart { .. } | Part::Other => Vec::new(),
        }
    }

    /// Lifecycle parts are repeated by the response; act on each only once
    fn first_sighting(&mut self, at: &PartRef, kind: &str) -> bool {
        if at.id.is_empty() {
            return true;
        }
        self.seen_parts.insert(format!("{}:{}", kind, at.id))
    }
}

fn content(
    kind: ContentKind,
    at: PartRef,
    text: String,
    delta: Option<String>,
    source: Source,
    incremental: fn(ContentChunk) -> Signal,
    whole: fn(ContentChunk) -> Signal,
) -> Vec<Signal> {
    let message_id = Some(at.message_id);
    match (source, delta) {
        (Source::Feed, Some(delta)) => vec![incremental(ContentChunk::for_message(kind, message_id, delta))],
        // Full-text feed updates are superseded by the response
        (Source::Feed, None) => Vec::new(),
        (Source::Response, _) => vec![whole(ContentChunk::for_message(kind, message_id, text))],
    }
}

/// What a feed event means for the running turn
enum FeedOutcome {
    Signals(Vec<Signal>),
    Idle,
    Failed(String),
    Ignore,
}

enum Step<T> {
    Abort,
    Feed(Option<FeedEvent>),
    Done(T),
}

pub struct OpencodeAdapter {
    ctx: SessionContext,
    transport: Box<dyn OpencodeTransport>,
    idle_grace: Duration,
    session: Mutex<Option<String>>,
}

impl OpencodeAdapter {
    pub fn new(ctx: SessionContext, transport: Box<dyn OpencodeTransport>, idle_grace: Duration) -> Self {
        ctx.install_semantic_tools(Self::semantic_tools());
        Self {
            ctx,
            transport,
            idle_grace,
            session: Mutex::new(None),
        }
    }

    pub fn semantic_tools() -> SemanticTools {
        SemanticTools::new()
            .route("task", OccurrenceKind::Subagent, KeySource::CallId)
            .route("skill", OccurrenceKind::Skill, KeySource::InputField("name"))
            .route("question", OccurrenceKind::Question, KeySource::CallId)
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::AdapterFactory {
        Box::new(|config, ctx| {
            let cfg: super::opencode_http::OpencodeConfig = serde_json::from_value(config.clone())
                .context("Invalid opencode backend config")?;
            let idle_grace = Duration::from_millis(cfg.idle_grace_ms);
            let transport = super::opencode_http::OpencodeHttpTransport::new(cfg)?;
            Ok(Box::new(OpencodeAdapter::new(ctx, Box::new(transport), idle_grace)) as Box<dyn Adapter>)
        })
    }

    /// Backend session id, once connected
    pub fn backend_session(&self) -> Option<String> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn classify(&self, session_id: &str, translator: &mut Translator, event: FeedEvent) -> FeedOutcome {
        match event {
            FeedEvent::PartUpdated { properties } => {
                if properties.part.at().map_or(true, |at| at.session_id != session_id) {
                    return FeedOutcome::Ignore;
                }
                FeedOutcome::Signals(translator.translate(properties.part, properties.delta, Source::Feed))
            }
            FeedEvent::SessionIdle { properties } if properties.session_id == session_id => FeedOutcome::Idle,
            FeedEvent::SessionError { properties }
                if properties.session_id.as_deref().map_or(true, |id| id == session_id) =>
            {
                FeedOutcome::Failed(properties.message())
            }
            _ => FeedOutcome::Ignore,
        }
    }
}

impl Adapter for OpencodeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Opencode
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
                .context("Failed to create OpenCode session")?;
            tracing::info!(session_id = %self.ctx.session_id(), backend_session = %session_id, "OpenCode session created");
            *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session_id);
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
            Ok(())
        })
    }

    fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a> {
        let ctx = &self.ctx;
        let transport = &self.transport;

        Box::pin(async_stream::stream! {
            ctx.begin_turn();
            let Some(session_id) = self.backend_session() else {
                yield Err(TurnError::NotConnected);
                return;
            };

            // Subscribe before prompting so no early delta is missed
            let mut feed = match transport.subscribe().await {
                Ok(feed) => Some(feed),
                Err(e) => {
                    tracing::warn!(error = %e, "OpenCode event feed unavailable, using response only");
                    None
                }
            };

            let mut translator = Translator::default();
            let mut idle = false;
            let response = transport.prompt(&session_id, prompt);
            tokio::pin!(response);

            let response = loop {
                let step = tokio::select! {
                    biased;
                    _ = abort.cancelled() => Step::Abort,
                    event = next_event(&mut feed), if feed.is_some() => Step::Feed(event),
                    result = &mut response => Step::Done(result),
                };

                match step {
                    Step::Abort => break None,
                    Step::Feed(None) => {
                        tracing::debug!("OpenCode feed closed before the response");
                        feed = None;
                    }
                    Step::Feed(Some(event)) => match self.classify(&session_id, &mut translator, event) {
                        FeedOutcome::Signals(signals) => {
                            for signal in signals {
                                if let Some(message) = ctx.ingest(signal) {
                                    yield Ok(message);
                                }
                            }
                        }
                        FeedOutcome::Idle => idle = true,
                        FeedOutcome::Failed(message) => {
                            yield Err(TurnError::Backend(message));
                            return;
                        }
                        FeedOutcome::Ignore => {}
                    },
                    Step::Done(Ok(response)) => break Some(response),
                    Step::Done(Err(e)) => {
                        tracing::error!(error = %e, "OpenCode prompt failed");
                        yield Err(TurnError::ConnectionLost(format!("{:#}", e)));
                        return;
                    }
                }
            };

            let Some(response) = response else {
                if let Err(e) = transport.abort(&session_id).await {
                    tracing::warn!(error = %e, "Failed to abort OpenCode session");
                }
                yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                return;
            };

            // The feed may trail the response; drain until idle or the grace window ends
            if !idle && feed.is_some() {
                let grace = tokio::time::sleep(self.idle_grace);
                tokio::pin!(grace);
                loop {
                    let step = tokio::select! {
                        biased;
                        _ = abort.cancelled() => Step::Abort,
                        event = next_event(&mut feed) => Step::Feed(event),
                        _ = &mut grace => Step::Done(()),
                    };
                    match step {
                        Step::Abort => {
                            if let Err(e) = transport.abort(&session_id).await {
                                tracing::warn!(error = %e, "Failed to abort OpenCode session");
                            }
                            yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                            return;
                        }
                        Step::Feed(None) => break,
                        Step::Feed(Some(event)) => match self.classify(&session_id, &mut translator, event) {
                            FeedOutcome::Signals(signals) => {
                                for signal in signals {
                                    if let Some(message) = ctx.ingest(signal) {
                                        yield Ok(message);
                                    }
                                }
                            }
                            FeedOutcome::Idle => break,
                            FeedOutcome::Failed(message) => {
                                yield Err(TurnError::Backend(message));
                                return;
                            }
                            FeedOutcome::Ignore => {}
                        },
                        Step::Done(()) => {
                            tracing::debug!(grace_ms = self.idle_grace.as_millis() as u64, "OpenCode feed not idle within grace window");
                            break;
                        }
                    }
                }
            }
            drop(feed);

            // Content the feed already delivered is suppressed by message id
            for part in response.parts() {
                for signal in translator.translate(part, None, Source::Response) {
                    if let Some(message) = ctx.ingest(signal) {
                        yield Ok(message);
                    }
                }
            }

            if let Some(finish) = response.info.get("finish").and_then(|f| f.as_str()) {
                ctx.set_stop_reason(finish);
            }
            if let Some(error) = response.info.get("error").filter(|e| !e.is_null()) {
                let message = SessionErrorProps {
                    session_id: None,
                    error: Some(error.clone()),
                }
                .message();
                yield Err(TurnError::Backend(message));
            }
        })
    }
}

async fn next_event<'a>(feed: &mut Option<BoxStream<'a, FeedEvent>>) -> Option<FeedEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => None,
    }
}
