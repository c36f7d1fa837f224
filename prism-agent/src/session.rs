// ABOUTME: Session façade - the single public surface over one backend adapter.
// ABOUTME: Serializes turns, counts yielded messages and emits turn lifecycle events.

use crate::adapter::{Adapter, BackendKind, TurnError, TurnStream, TurnSummary};
use crate::config::BackendConfig;
use crate::context::SessionContext;
use crate::event::{AgentEvent, ErrorData, EventPayload, EventType, TurnCompleteData};
use crate::handlers::Subscription;
use crate::registry::AdapterRegistry;
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// One adapter connection with its own handlers and dedup state.
///
/// Dropping a session without [`Session::close`] leaves the backend to
/// clean up on its own (child processes are killed on drop).
pub struct Session {
    adapter: Box<dyn Adapter>,
    turn: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create the configured adapter with a fresh context and connect it
    pub async fn open(registry: &AdapterRegistry, config: &BackendConfig) -> Result<Self> {
        let ctx = SessionContext::generate();
        let adapter = registry.create_from_config(config, ctx)?;
        let session = Self::with_adapter(adapter);
        session
            .adapter
            .connect()
            .await
            .with_context(|| format!("Failed to connect {} backend", config.backend_type()))?;
        tracing::info!(
            session_id = %session.id(),
            backend = %session.kind(),
            "Session opened"
        );
        Ok(session)
    }

    /// Wrap an adapter that is already built. The caller is responsible for
    /// connecting it.
    pub fn with_adapter(adapter: Box<dyn Adapter>) -> Self {
        Self {
            adapter,
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        self.adapter.context().session_id()
    }

    pub fn kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn context(&self) -> &SessionContext {
        self.adapter.context()
    }

    pub fn on<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.context().on(event_type, handler)
    }

    /// Run one turn as a lazy stream of normalized messages.
    ///
    /// The last item is an `Err` when the turn did not complete normally.
    /// A second stream started while one is still alive yields only
    /// `Err(TurnError::Busy)`.
    pub fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a> {
        Box::pin(async_stream::stream! {
            let _turn = match self.turn.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!(session_id = %self.id(), "Turn rejected, another turn is running");
                    yield Err(TurnError::Busy);
                    return;
                }
            };

            let ctx = self.context();
            tracing::debug!(session_id = %ctx.session_id(), backend = %self.kind(), "Turn started");

            let mut inner = self.adapter.stream(prompt, abort);
            let mut messages = 0usize;
            let mut failure = None;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(message) => {
                        messages += 1;
                        yield Ok(message);
                    }
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
            drop(inner);

            match failure {
                None => {
                    let stop_reason = ctx.stop_reason();
                    tracing::debug!(
                        session_id = %ctx.session_id(),
                        messages,
                        stop_reason = ?stop_reason,
                        "Turn complete"
                    );
                    ctx.emit(EventPayload::TurnComplete(TurnCompleteData {
                        stop_reason,
                        messages,
                    }));
                }
                Some(error) => {
                    if error.is_abort() {
                        tracing::info!(session_id = %ctx.session_id(), messages, "Turn aborted");
                    } else {
                        tracing::warn!(session_id = %ctx.session_id(), error = %error, "Turn failed");
                    }
                    ctx.emit(EventPayload::Error(ErrorData {
                        message: error.to_string(),
                        aborted: error.is_abort(),
                    }));
                    yield Err(error);
                }
            }
        })
    }

    /// Drive a turn to completion, for consumers that only use handlers
    pub async fn send(&self, prompt: &str) -> Result<TurnSummary, TurnError> {
        let mut stream = self.stream(prompt, CancellationToken::new());
        let mut messages = 0;
        while let Some(item) = stream.next().await {
            item?;
            messages += 1;
        }
        drop(stream);

        let ctx = self.context();
        Ok(TurnSummary {
            messages,
            incomplete: !ctx.incomplete_messages().is_empty(),
            stop_reason: ctx.take_stop_reason(),
        })
    }

    /// Disconnect the backend and drop every handler and dedup entry
    pub async fn close(&self) -> Result<()> {
        let result = self.adapter.disconnect().await;
        self.context().reset();
        tracing::info!(session_id = %self.id(), "Session closed");
        result
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
