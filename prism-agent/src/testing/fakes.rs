// ABOUTME: Scripted in-memory transports for the Claude, OpenCode and Copilot adapters.
// ABOUTME: Each fake is Clone so a test keeps a handle for inspection after boxing it into an adapter.

use crate::backends::claude::{
    ClaudeTransport, HookAck, HookCallbacks, SdkMessage, SubagentStartInput, SubagentStopInput,
};
use crate::backends::copilot::{CopilotEvent, CopilotTransport, EventCallback};
use crate::backends::opencode::{FeedEvent, OpencodeTransport, PromptResponse};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// One scripted step of a Claude turn
#[derive(Debug, Clone)]
pub enum ClaudeStep {
    Message(SdkMessage),
    /// Invoke the `SubagentStart` hook callback
    HookStart { agent_id: String, agent_type: String },
    /// Invoke the `SubagentStop` hook callback
    HookStop { agent_id: String },
    /// Never produce anything else; the turn only ends by abort
    Pending,
}

#[derive(Default)]
struct ClaudeScript {
    turns: Mutex<VecDeque<Vec<ClaudeStep>>>,
    prompts: Mutex<Vec<String>>,
    acks: Mutex<Vec<HookAck>>,
    interrupts: AtomicUsize,
    closed: AtomicUsize,
}

/// Fake Claude Code process. Each `query` plays the next scripted turn.
#[derive(Clone, Default)]
pub struct FakeClaude {
    script: Arc<ClaudeScript>,
}

impl FakeClaude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(self, steps: Vec<ClaudeStep>) -> Self {
        locked(&self.script.turns).push_back(steps);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        locked(&self.script.prompts).clone()
    }

    /// Acks returned by hook callbacks, in call order
    pub fn acks(&self) -> Vec<HookAck> {
        locked(&self.script.acks).clone()
    }

    pub fn interrupts(&self) -> usize {
        self.script.interrupts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closed.load(Ordering::SeqCst)
    }
}

impl ClaudeTransport for FakeClaude {
    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn query<'a>(
        &'a self,
        prompt: &'a str,
        hooks: Arc<dyn HookCallbacks>,
    ) -> BoxFuture<'a, Result<BoxStream<'a, SdkMessage>>> {
        Box::pin(async move {
            locked(&self.script.prompts).push(prompt.to_string());
            let steps = locked(&self.script.turns)
                .pop_front()
                .ok_or_else(|| anyhow!("FakeClaude: no scripted turn for '{}'", prompt))?;
            let script = Arc::clone(&self.script);

            let messages: BoxStream<'a, SdkMessage> = Box::pin(async_stream::stream! {
                for step in steps {
                    match step {
                        ClaudeStep::Message(message) => yield message,
                        ClaudeStep::HookStart { agent_id, agent_type } => {
                            let ack = hooks.subagent_start(&SubagentStartInput {
                                agent_id,
                                agent_type,
                                session_id: None,
                            });
                            locked(&script.acks).push(ack);
                            // Give the adapter a chance to pick the hook up
                            // before the next message
                            tokio::task::yield_now().await;
                        }
                        ClaudeStep::HookStop { agent_id } => {
                            let ack = hooks.subagent_stop(&SubagentStopInput {
                                agent_id,
                                session_id: None,
                            });
                            locked(&script.acks).push(ack);
                            tokio::task::yield_now().await;
                        }
                        ClaudeStep::Pending => futures::future::pending::<()>().await,
                    }
                }
            });
            Ok(messages)
        })
    }

    fn interrupt<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.script.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.script.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// How the prompt call of a scripted OpenCode turn resolves
#[derive(Debug, Clone)]
enum Reply {
    Respond(PromptResponse),
    Fail(String),
    Hang,
}

/// One scripted OpenCode turn
#[derive(Debug, Clone)]
pub struct OpencodeTurn {
    /// `None` makes the feed subscription fail
    feed: Option<Vec<FeedEvent>>,
    keep_feed_open: bool,
    reply: Reply,
    delay: Option<Duration>,
}

impl OpencodeTurn {
    /// Turn whose prompt returns this response and whose feed is empty
    pub fn respond(response: PromptResponse) -> Self {
        Self {
            feed: Some(Vec::new()),
            keep_feed_open: false,
            reply: Reply::Respond(response),
            delay: None,
        }
    }

    /// Turn whose prompt request fails
    pub fn fail(message: &str) -> Self {
        Self {
            reply: Reply::Fail(message.to_string()),
            ..Self::respond(PromptResponse::default())
        }
    }

    /// Turn whose prompt never returns
    pub fn hang() -> Self {
        Self {
            reply: Reply::Hang,
            ..Self::respond(PromptResponse::default())
        }
    }

    pub fn with_feed(mut self, events: Vec<FeedEvent>) -> Self {
        self.feed = Some(events);
        self
    }

    /// Feed stays open after its scripted events, like a live server
    pub fn keep_feed_open(mut self) -> Self {
        self.keep_feed_open = true;
        self
    }

    pub fn without_feed(mut self) -> Self {
        self.feed = None;
        self
    }

    /// Delay the prompt response
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct OpencodeScript {
    session_id: String,
    turns: Mutex<VecDeque<OpencodeTurn>>,
    prompts: Mutex<Vec<String>>,
    aborts: Mutex<Vec<String>>,
}

/// Fake OpenCode server. `subscribe` and `prompt` both read the front
/// scripted turn; `prompt` consumes it.
#[derive(Clone)]
pub struct FakeOpencode {
    script: Arc<OpencodeScript>,
}

impl FakeOpencode {
    pub fn new(session_id: &str) -> Self {
        Self {
            script: Arc::new(OpencodeScript {
                session_id: session_id.to_string(),
                turns: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
                aborts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn turn(self, turn: OpencodeTurn) -> Self {
        locked(&self.script.turns).push_back(turn);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        locked(&self.script.prompts).clone()
    }

    /// Session ids that were aborted
    pub fn aborts(&self) -> Vec<String> {
        locked(&self.script.aborts).clone()
    }
}

impl OpencodeTransport for FakeOpencode {
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(self.script.session_id.clone()) })
    }

    fn subscribe<'a>(&'a self) -> BoxFuture<'a, Result<BoxStream<'a, FeedEvent>>> {
        Box::pin(async move {
            let (feed, keep_open) = match locked(&self.script.turns).front() {
                Some(turn) => (turn.feed.clone(), turn.keep_feed_open),
                None => (Some(Vec::new()), false),
            };
            let events = feed.ok_or_else(|| anyhow!("FakeOpencode: feed unavailable"))?;
            let feed = stream::iter(events);
            Ok(if keep_open {
                feed.chain(stream::pending()).boxed()
            } else {
                feed.boxed()
            })
        })
    }

    fn prompt<'a>(
        &'a self,
        _session_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<PromptResponse>> {
        Box::pin(async move {
            locked(&self.script.prompts).push(text.to_string());
            let turn = locked(&self.script.turns)
                .pop_front()
                .ok_or_else(|| anyhow!("FakeOpencode: no scripted turn for '{}'", text))?;
            if let Some(delay) = turn.delay {
                tokio::time::sleep(delay).await;
            }
            match turn.reply {
                Reply::Respond(response) => Ok(response),
                Reply::Fail(message) => Err(anyhow!(message)),
                Reply::Hang => futures::future::pending().await,
            }
        })
    }

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            locked(&self.script.aborts).push(session_id.to_string());
            Ok(())
        })
    }
}

struct CopilotScript {
    session_id: String,
    turns: Mutex<VecDeque<Vec<CopilotEvent>>>,
    subscribers: Mutex<HashMap<u64, (String, EventCallback)>>,
    next_subscription: AtomicU64,
    sent: Mutex<Vec<String>>,
    aborts: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

/// Fake Copilot server. `send` pushes the next scripted turn's events to
/// the session's subscribers synchronously, before it returns.
#[derive(Clone)]
pub struct FakeCopilot {
    script: Arc<CopilotScript>,
}

impl FakeCopilot {
    pub fn new(session_id: &str) -> Self {
        Self {
            script: Arc::new(CopilotScript {
                session_id: session_id.to_string(),
                turns: Mutex::new(VecDeque::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                sent: Mutex::new(Vec::new()),
                aborts: Mutex::new(Vec::new()),
                destroyed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Events pushed during the next `send`. An empty turn pushes nothing,
    /// leaving the turn open until it is aborted.
    pub fn turn(self, events: Vec<CopilotEvent>) -> Self {
        locked(&self.script.turns).push_back(events);
        self
    }

    pub fn sent(&self) -> Vec<String> {
        locked(&self.script.sent).clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        locked(&self.script.aborts).clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        locked(&self.script.destroyed).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        locked(&self.script.subscribers).len()
    }

    /// Push an event outside of any scripted turn
    pub fn push(&self, event: CopilotEvent) {
        let callbacks: Vec<EventCallback> = locked(&self.script.subscribers)
            .values()
            .filter(|(session, _)| *session == self.script.session_id)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

impl CopilotTransport for FakeCopilot {
    fn create_session<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(self.script.session_id.clone()) })
    }

    fn subscribe(&self, session_id: &str, callback: EventCallback) -> u64 {
        let id = self.script.next_subscription.fetch_add(1, Ordering::SeqCst);
        locked(&self.script.subscribers).insert(id, (session_id.to_string(), callback));
        id
    }

    fn unsubscribe(&self, subscription: u64) {
        locked(&self.script.subscribers).remove(&subscription);
    }

    fn send<'a>(&'a self, _session_id: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            locked(&self.script.sent).push(prompt.to_string());
            let events = locked(&self.script.turns).pop_front().unwrap_or_default();
            for event in events {
                self.push(event);
            }
            Ok(())
        })
    }

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            locked(&self.script.aborts).push(session_id.to_string());
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            locked(&self.script.destroyed).push(session_id.to_string());
            Ok(())
        })
    }
}
