// ABOUTME: Test tooling shipped with the crate: scripted fake transports and an event recorder.
// ABOUTME: Lets integration tests drive every adapter without a real backend process or server.

pub mod fakes;
pub mod recording;

pub use fakes::{ClaudeStep, FakeClaude, FakeCopilot, FakeOpencode, OpencodeTurn};
pub use recording::EventRecorder;
