// ABOUTME: Session-scoped state handed to an adapter: id, handler registry, coordinator.
// ABOUTME: Adapters route every translated signal through here so dedup and dispatch stay per session.

use crate::coordinator::{Coordinator, SemanticTools, Signal};
use crate::event::{AgentEvent, EventPayload, EventType};
use crate::handlers::{Handler, HandlerRegistry, Subscription};
use crate::message::NormalizedMessage;
use std::sync::{Arc, Mutex};

struct Inner {
    session_id: String,
    handlers: HandlerRegistry,
    coordinator: Mutex<Coordinator>,
    stop_reason: Mutex<Option<String>>,
}

/// Cheap to clone; every clone refers to the same session state.
///
/// A new context is created per session and never reused, so nothing an
/// adapter records here outlives the session that created it.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                handlers: HandlerRegistry::new(),
                coordinator: Mutex::new(Coordinator::default()),
                stop_reason: Mutex::new(None),
            }),
        }
    }

    /// Context with a fresh uuid v4 session id
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub fn on<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.on(event_type, handler)
    }

    pub fn on_handler(&self, event_type: EventType, handler: Handler) -> Subscription {
        self.inner.handlers.on_handler(event_type, handler)
    }

    /// Dispatch one payload to this session's handlers
    pub fn emit(&self, payload: EventPayload) -> usize {
        let event = AgentEvent::new(self.session_id(), payload);
        self.inner.handlers.emit(&event)
    }

    /// Run a signal through dedup, dispatch the resulting events, and return
    /// the message to yield, if any.
    ///
    /// Handlers run after the coordinator lock is released, so they may call
    /// back into the session.
    pub fn ingest(&self, signal: Signal) -> Option<NormalizedMessage> {
        let ingested = self.coordinator().ingest(signal);
        for payload in ingested.events {
            self.emit(payload);
        }
        ingested.message
    }

    /// Declare which generic tool names this backend also reports through a
    /// semantic channel
    pub fn install_semantic_tools(&self, tools: SemanticTools) {
        self.coordinator().set_semantic_tools(tools);
    }

    pub fn begin_turn(&self) {
        self.coordinator().begin_turn();
        self.take_stop_reason();
    }

    /// Record why the backend ended the current turn
    pub fn set_stop_reason(&self, reason: impl Into<String>) {
        *self.inner.stop_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.inner
            .stop_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn take_stop_reason(&self) -> Option<String> {
        self.inner
            .stop_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn incomplete_messages(&self) -> Vec<String> {
        self.coordinator().incomplete_messages()
    }

    /// Forget all dedup state and drop every handler (session teardown)
    pub fn reset(&self) {
        self.coordinator().reset();
        self.inner.handlers.clear();
    }

    fn coordinator(&self) -> std::sync::MutexGuard<'_, Coordinator> {
        self.inner
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}
