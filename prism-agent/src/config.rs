// ABOUTME: Configuration file support for prism-agent.
// ABOUTME: Loads backend config from TOML with a [backend] section keyed by `type`.

use crate::adapter::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
}

/// Backend configuration with type discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: "claude", "opencode", "copilot" or "mock"
    #[serde(rename = "type")]
    pub backend_type: String,

    /// Remaining fields passed to the adapter factory
    #[serde(flatten)]
    pub config: toml::Table,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }
}

impl BackendConfig {
    pub fn new(backend_type: &str) -> Self {
        Self {
            backend_type: backend_type.to_string(),
            config: toml::Table::new(),
        }
    }

    /// Get backend type name
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Known backend kind, if the type names one of the built-in adapters
    pub fn kind(&self) -> Option<BackendKind> {
        self.backend_type.parse().ok()
    }

    /// Convert the backend table to JSON for the adapter factory
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Backend config is not representable as JSON");
            serde_json::json!({})
        })
    }
}
