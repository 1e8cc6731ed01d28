//! Configuration loading and data directory resolution
//!
//! TOML file plus environment-variable overrides. The data directory (which
//! holds the SQLite database) is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FAB_DATA_DIR` environment variable
//! 3. `data_dir` key in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the data directory
pub const DATA_DIR_ENV: &str = "FAB_DATA_DIR";

/// Environment variable naming the config file path
pub const CONFIG_PATH_ENV: &str = "FAB_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Data directory override (priority 3, see module docs)
    pub data_dir: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capabilities: CapabilityConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the service
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5741".to_string(),
        }
    }
}

/// Remote capability endpoints and credentials
///
/// The four capabilities (image generation, vision analysis, 3D preview,
/// model conversion) are vendor-hosted HTTP services. Base URLs default to
/// the hosted endpoints; the API key has no default and must come from the
/// config file or `FAB_API_KEY`.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityConfig {
    pub image_generation_url: String,
    pub vision_url: String,
    pub preview_url: String,
    pub conversion_url: String,
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            image_generation_url: "https://api.fab.example/generate".to_string(),
            vision_url: "https://api.fab.example/vision".to_string(),
            preview_url: "https://api.fab.example/preview3d".to_string(),
            conversion_url: "https://api.fab.example/convert".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl CapabilityConfig {
    /// Resolve the API key from config, falling back to `FAB_API_KEY`
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("FAB_API_KEY").ok())
    }
}

/// Retry policy tunables for external capability calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total invocation attempts per stage execution
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds (doubled after each failure)
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

impl TomlConfig {
    /// Load configuration from an explicit path, `FAB_CONFIG`, or the
    /// platform config location; missing file yields defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(p) => Some(PathBuf::from(p)),
                Err(_) => default_config_path(),
            },
        };

        match path {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load and parse a TOML config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Default per-platform config file path (`<config dir>/fab/config.toml`)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fab").join("config.toml"))
}

/// Resolve the data directory (see module docs for priority order)
pub fn resolve_data_dir(cli_arg: Option<&str>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.data_dir {
        return PathBuf::from(path);
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fab"))
        .unwrap_or_else(|| PathBuf::from("./fab_data"))
}

/// Ensure the data directory exists, creating it if missing
pub fn ensure_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "Created data directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TomlConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.logging.level, "info");
        assert!(config.server.bind.contains(':'));
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            data_dir = "/tmp/fab-test"

            [retry]
            max_attempts = 5
            base_delay_ms = 100

            [capabilities]
            image_generation_url = "http://localhost:9001/generate"
            vision_url = "http://localhost:9001/vision"
            preview_url = "http://localhost:9001/preview"
            conversion_url = "http://localhost:9001/convert"
            timeout_secs = 10
            "#,
        )
        .unwrap();

        let config = TomlConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir.as_deref(), Some("/tmp/fab-test"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.capabilities.timeout_secs, 10);
        // Unspecified sections fall back to defaults
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn cli_arg_wins_data_dir_resolution() {
        let config = TomlConfig {
            data_dir: Some("/from/toml".to_string()),
            ..Default::default()
        };
        let dir = resolve_data_dir(Some("/from/cli"), &config);
        assert_eq!(dir, PathBuf::from("/from/cli"));
    }

    #[test]
    fn toml_data_dir_used_without_cli() {
        let config = TomlConfig {
            data_dir: Some("/from/toml".to_string()),
            ..Default::default()
        };
        // Note: assumes FAB_DATA_DIR is not set in the test environment
        if std::env::var(DATA_DIR_ENV).is_err() {
            let dir = resolve_data_dir(None, &config);
            assert_eq!(dir, PathBuf::from("/from/toml"));
        }
    }
}
