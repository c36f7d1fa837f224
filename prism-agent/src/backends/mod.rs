// ABOUTME: Backend adapters (Claude Code, OpenCode, Copilot, mock) and their transports.
// ABOUTME: Each adapter implements the Adapter trait over a swappable transport trait.

pub mod mock;

pub mod claude;
pub mod claude_cli;

pub mod opencode;
pub mod opencode_http;

pub mod copilot;
pub mod copilot_rpc;
