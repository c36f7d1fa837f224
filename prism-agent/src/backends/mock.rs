// ABOUTME: Mock adapter for testing - replays pre-configured signals through the session pipeline.
// ABOUTME: Allows deterministic tests of dedup, dispatch and turn handling without a real backend.
//!
//! # Example
//!
//! ```no_run
//! use prism_agent::backends::mock::MockAdapter;
//! use prism_agent::coordinator::Signal;
//! use prism_agent::{Adapter, SessionContext};
//! use serde_json::json;
//!
//! # async fn example() {
//! let mock = MockAdapter::new(SessionContext::generate())
//!     .on_prompt("hello").respond_text("Hi there!")
//!     .on_prompt("read file").respond_with(vec![
//!         Signal::ToolStart {
//!             call_id: "t1".to_string(),
//!             name: "Read".to_string(),
//!             input: json!({"path": "/tmp/foo"}),
//!         },
//!         Signal::ToolEnd {
//!             call_id: "t1".to_string(),
//!             name: None,
//!             success: true,
//!             output: Some(json!("file contents")),
//!             error: None,
//!         },
//!     ]);
//!
//! let summary = mock.send("hello").await.unwrap();
//! assert_eq!(summary.messages, 1);
//! # }
//! ```

use crate::adapter::{Adapter, BackendKind, TurnError, TurnStream};
use crate::context::SessionContext;
use crate::coordinator::{ContentChunk, ContentKind, SemanticTools, Signal};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// How a scripted turn ends after its signals
#[derive(Debug, Clone)]
enum Ending {
    Complete,
    Fail(TurnError),
    /// Stay open until aborted
    Stall,
}

struct Expectation {
    pattern: String,
    signals: Vec<Signal>,
    ending: Ending,
}

/// Mock adapter for testing
pub struct MockAdapter {
    ctx: SessionContext,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Route some tool names through semantic channels, as a real backend would
    pub fn with_semantic_tools(self, tools: SemanticTools) -> Self {
        self.ctx.install_semantic_tools(tools);
        self
    }

    /// Set up an expectation for a prompt containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            adapter: self,
            pattern: pattern.to_string(),
        }
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::AdapterFactory {
        Box::new(|_config, ctx| Ok(Box::new(MockAdapter::new(ctx)) as Box<dyn Adapter>))
    }

    /// FIFO preference: the front expectation wins if it matches, otherwise
    /// the first matching one anywhere in the queue
    fn take_expectation(&self, prompt: &str) -> Option<Expectation> {
        let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        match exp.front() {
            Some(front) if prompt.contains(&front.pattern) => exp.pop_front(),
            Some(_) => exp
                .iter()
                .position(|e| prompt.contains(&e.pattern))
                .and_then(|i| exp.remove(i)),
            None => None,
        }
    }
}

impl Adapter for MockAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stream<'a>(&'a self, prompt: &'a str, abort: CancellationToken) -> TurnStream<'a> {
        let ctx = &self.ctx;

        Box::pin(async_stream::stream! {
            ctx.begin_turn();
            self.prompts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(prompt.to_string());

            let expectation = self.take_expectation(prompt).unwrap_or_else(|| Expectation {
                pattern: String::new(),
                signals: vec![Signal::Text(ContentChunk::for_message(
                    ContentKind::Text,
                    None,
                    format!("Mock: no expectation for '{}'", prompt),
                ))],
                ending: Ending::Complete,
            });

            for signal in expectation.signals {
                // One suspension point per signal so aborts are observed
                tokio::task::yield_now().await;
                if abort.is_cancelled() {
                    yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                    return;
                }
                if let Some(message) = ctx.ingest(signal) {
                    yield Ok(message);
                }
            }

            match expectation.ending {
                Ending::Complete => ctx.set_stop_reason("end_turn"),
                Ending::Fail(error) => yield Err(error),
                Ending::Stall => {
                    abort.cancelled().await;
                    yield Err(TurnError::Aborted { incomplete: ctx.incomplete_messages() });
                }
            }
        })
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    adapter: MockAdapter,
    pattern: String,
}

impl ExpectationBuilder {
    fn push(self, signals: Vec<Signal>, ending: Ending) -> MockAdapter {
        self.adapter
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation {
                pattern: self.pattern,
                signals,
                ending,
            });
        self.adapter
    }

    /// Replay these signals, then end the turn normally
    pub fn respond_with(self, signals: Vec<Signal>) -> MockAdapter {
        self.push(signals, Ending::Complete)
    }

    /// Respond with one materialized text message
    pub fn respond_text(self, text: &str) -> MockAdapter {
        self.respond_with(vec![Signal::Text(ContentChunk::for_message(ContentKind::Text, None, text))])
    }

    /// Replay these signals, then fail the turn
    pub fn respond_error(self, signals: Vec<Signal>, error: TurnError) -> MockAdapter {
        self.push(signals, Ending::Fail(error))
    }

    /// Replay these signals, then keep the turn open until it is aborted
    pub fn respond_and_stall(self, signals: Vec<Signal>) -> MockAdapter {
        self.push(signals, Ending::Stall)
    }
}
