// ABOUTME: Root library module for the prism terminal driver
// ABOUTME: Exposes configuration, XDG paths and terminal rendering used by the binary

pub mod config;
pub mod paths;
pub mod render;

// Re-export prism-agent types for convenience
pub use prism_agent::{AdapterRegistry, BackendConfig, Session};
