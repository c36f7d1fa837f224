// ABOUTME: Application configuration from TOML with environment variable overrides
// ABOUTME: Holds the backend table handed to prism-agent and the logging settings

use crate::paths;
use anyhow::{Context, Result};
use prism_agent::BackendConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// File name prefix for a daily-rolling JSON log under the data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_backend() -> BackendConfig {
    BackendConfig::new("claude")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Find the config file, checking multiple locations in order:
    /// 1. PRISM_CONFIG_PATH env var (if set)
    /// 2. ./prism.toml (current directory - for development)
    /// 3. ~/.config/prism/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("PRISM_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "PRISM_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from("prism.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load from the standard locations, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with environment variable overrides.
    /// An explicit path must exist; otherwise the standard locations are searched.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from file");
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Self::default()
            }
        };

        if let Ok(val) = std::env::var("PRISM_BACKEND") {
            config.backend.backend_type = val;
        }
        if let Ok(val) = std::env::var("PRISM_LOG") {
            config.logging.level = val;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<Self>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.backend.backend_type.trim().is_empty() {
            anyhow::bail!("backend.type is required (set in prism.toml or PRISM_BACKEND env var)");
        }
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.backend.backend_type(), "claude");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_backend_table_keeps_extra_fields() {
        let config: AppConfig = toml::from_str(
            r#"
            [backend]
            type = "opencode"
            base_url = "http://127.0.0.1:4096"

            [logging]
            level = "debug"
            file = "prism"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.backend_type(), "opencode");
        assert_eq!(config.backend.to_json_value()["base_url"], "http://127.0.0.1:4096");
        assert_eq!(config.logging.file.as_deref(), Some("prism"));
    }

    #[test]
    fn test_blank_backend_type_is_rejected() {
        let config = AppConfig {
            backend: BackendConfig::new("  "),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
