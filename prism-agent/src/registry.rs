// ABOUTME: Registry pattern for runtime adapter selection.
// ABOUTME: Adapters register factories, sessions create them by backend name from config.

use crate::adapter::Adapter;
use crate::config::BackendConfig;
use crate::context::SessionContext;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Factory function that builds an adapter bound to one session's context
pub type AdapterFactory =
    Box<dyn Fn(&Value, SessionContext) -> Result<Box<dyn Adapter>> + Send + Sync>;

/// Registry for runtime adapter selection
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register an adapter factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value, SessionContext) -> Result<Box<dyn Adapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create an adapter by name for the given session
    pub fn create(&self, name: &str, config: &Value, ctx: SessionContext) -> Result<Box<dyn Adapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown backend: {}", name))?;
        tracing::debug!(backend = %name, session_id = %ctx.session_id(), "Creating adapter");
        factory(config, ctx)
    }

    /// Available backend names, sorted
    pub fn available(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Create an adapter from a BackendConfig
    pub fn create_from_config(&self, config: &BackendConfig, ctx: SessionContext) -> Result<Box<dyn Adapter>> {
        self.create(config.backend_type(), &config.to_json_value(), ctx)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        use crate::backends::claude::ClaudeAdapter;
        use crate::backends::copilot::CopilotAdapter;
        use crate::backends::mock::MockAdapter;
        use crate::backends::opencode::OpencodeAdapter;

        Self::new()
            .register("mock", MockAdapter::factory())
            .register("claude", ClaudeAdapter::factory())
            .register("opencode", OpencodeAdapter::factory())
            .register("copilot", CopilotAdapter::factory())
    }
}
