// ABOUTME: Where prism keeps its config file and rolling logs on disk.
// ABOUTME: Resolved through the platform's user directories, with local fallbacks.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "prism";
const APPLICATION: &str = "prism";

/// Pick one directory out of the platform layout, or `fallback` when the
/// platform has no home directory to derive it from.
fn resolve(pick: impl FnOnce(&ProjectDirs) -> &Path, fallback: &str) -> PathBuf {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| pick(&dirs).to_path_buf())
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Daily log files land here; `./data/logs` without a home directory
pub fn log_dir() -> PathBuf {
    resolve(ProjectDirs::data_dir, "./data").join("logs")
}

/// Lowest-priority config file, after `PRISM_CONFIG_PATH` and `./prism.toml`
pub fn config_file() -> PathBuf {
    resolve(ProjectDirs::config_dir, ".").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_ends_in_logs() {
        assert_eq!(log_dir().file_name().unwrap(), "logs");
    }

    #[test]
    fn test_config_file_name() {
        assert_eq!(config_file().file_name().unwrap(), "config.toml");
    }
}
