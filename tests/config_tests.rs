// ABOUTME: Tests for application configuration loading
// ABOUTME: Verifies file lookup, env var overrides and validation

use prism::config::AppConfig;
use serial_test::serial;

/// Helper to clear all config-related env vars
fn clear_config_env_vars() {
    std::env::remove_var("PRISM_CONFIG_PATH");
    std::env::remove_var("PRISM_BACKEND");
    std::env::remove_var("PRISM_LOG");
}

#[test]
#[serial]
fn test_config_loads_from_env_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prism.toml");
    std::fs::write(
        &path,
        r#"
[backend]
type = "copilot"
model = "gpt-5"

[logging]
level = "debug"
"#,
    )
    .unwrap();
    std::env::set_var("PRISM_CONFIG_PATH", &path);

    let config = AppConfig::load().unwrap();
    assert_eq!(config.backend.backend_type(), "copilot");
    assert_eq!(config.backend.to_json_value()["model"], "gpt-5");
    assert_eq!(config.logging.level, "debug");

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prism.toml");
    std::fs::write(&path, "[backend]\ntype = \"claude\"\n").unwrap();

    std::env::set_var("PRISM_BACKEND", "mock");
    std::env::set_var("PRISM_LOG", "warn,prism_agent=trace");
    let config = AppConfig::load_from(Some(&path)).unwrap();

    assert_eq!(config.backend.backend_type(), "mock");
    assert_eq!(config.logging.level, "warn,prism_agent=trace");

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_explicit_missing_path_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = AppConfig::load_from(Some(&missing)).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.toml"));
}

#[test]
#[serial]
fn test_invalid_toml_names_the_file() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[backend\ntype = ").unwrap();

    let err = AppConfig::load_from(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
#[serial]
fn test_blank_backend_override_is_rejected() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prism.toml");
    std::fs::write(&path, "[backend]\ntype = \"opencode\"\n").unwrap();

    std::env::set_var("PRISM_BACKEND", " ");
    let err = AppConfig::load_from(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("backend.type is required"));

    clear_config_env_vars();
}
