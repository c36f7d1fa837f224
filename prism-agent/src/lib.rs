// ABOUTME: One normalized event stream over heterogeneous coding-agent backends.
// ABOUTME: Adapters for Claude Code, OpenCode and Copilot feed a shared dedup layer behind a Session.

pub mod event;
pub mod message;
pub mod handlers;
pub mod bridge;
pub mod coordinator;
pub mod context;
pub mod adapter;
pub mod registry;
pub mod config;
pub mod session;
pub mod replay;

pub mod backends;
pub mod testing;

pub use adapter::{Adapter, BackendKind, TurnError, TurnItem, TurnStream, TurnSummary};
pub use config::{BackendConfig, Config};
pub use context::SessionContext;
pub use event::{AgentEvent, EventPayload, EventType};
pub use handlers::{HandlerRegistry, Subscription};
pub use message::NormalizedMessage;
pub use registry::{AdapterFactory, AdapterRegistry};
pub use session::Session;
