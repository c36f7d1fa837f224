// ABOUTME: Common contract every backend adapter implements.
// ABOUTME: A turn is a lazy, cancellable stream of normalized messages ending in success or a TurnError.

use crate::context::SessionContext;
use crate::event::EventType;
use crate::handlers::{Handler, Subscription};
use crate::message::NormalizedMessage;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Claude,
    Opencode,
    Copilot,
    Mock,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Claude => "claude",
            BackendKind::Opencode => "opencode",
            BackendKind::Copilot => "copilot",
            BackendKind::Mock => "mock",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(BackendKind::Claude),
            "opencode" => Ok(BackendKind::Opencode),
            "copilot" => Ok(BackendKind::Copilot),
            "mock" => Ok(BackendKind::Mock),
            other => Err(anyhow::anyhow!("Unknown backend: {}", other)),
        }
    }
}

/// Terminal failure of a turn. Always the last item of a turn stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// The abort signal fired; `incomplete` lists message ids whose deltas
    /// were yielded without a final form
    #[error("turn aborted")]
    Aborted { incomplete: Vec<String> },
    #[error("backend connection lost: {0}")]
    ConnectionLost(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("a turn is already in progress on this session")]
    Busy,
    #[error("adapter is not connected")]
    NotConnected,
}

impl TurnError {
    pub fn is_abort(&self) -> bool {
        matches!(self, TurnError::Aborted { .. })
    }
}

pub type TurnItem = Result<NormalizedMessage, TurnError>;

pub type TurnStream<'a> = BoxStream<'a, TurnItem>;

/// Outcome of a turn driven to completion without consuming its messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    pub messages: usize,
    /// Deltas were yielded for a message that never got its final form
    pub incomplete: bool,
    pub stop_reason: Option<String>,
}

/// One backend, one session.
///
/// Implementations translate native signals into [`crate::coordinator::Signal`]s
/// and hand them to [`SessionContext::ingest`], which dedups, dispatches to
/// handlers and returns what the turn stream yields.
pub trait Adapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn context(&self) -> &SessionContext;

    /// Establish the backend connection (spawn, handshake, create session)
    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;

    /// Release backend resources. Safe to call more than once.
    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;

    /// Run one turn. The stream is lazy: nothing is sent to the backend
    /// until it is first polled. Firing `abort` ends it with
    /// [`TurnError::Aborted`] at the next suspension point.
    fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a>;

    fn on(&self, event_type: EventType, handler: Handler) -> Subscription {
        self.context().on_handler(event_type, handler)
    }

    /// Drive a turn to completion for handler-only consumers
    fn send<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<TurnSummary, TurnError>> {
        Box::pin(async move {
            let mut stream = self.stream(prompt, CancellationToken::new());
            let mut messages = 0;
            while let Some(item) = stream.next().await {
                item?;
                messages += 1;
            }
            drop(stream);
            Ok(TurnSummary {
                messages,
                incomplete: !self.context().incomplete_messages().is_empty(),
                stop_reason: self.context().take_stop_reason(),
            })
        })
    }
}
