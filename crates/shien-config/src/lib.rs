#![deny(unsafe_code)]

//! Configuration loading, validation, and path resolution for shien.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure, and the
//! [`paths`] module for locating the data directory and control socket.

/// Data directory and rendezvous path resolution.
pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use paths::DataDir;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cannot determine the home directory; pass --data-dir or set SHIEN_DATA_DIR")]
    NoHomeDir,
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Control client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Control socket override. Defaults to `<data_dir>/shien.sock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    /// How long in-flight requests may run once draining starts.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    5
}

/// Configuration for the control client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound on one request/response round trip, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// Logging configuration.
///
/// The daemon writes to two destinations: one for normal output and one
/// for warnings and errors. When a path is absent the corresponding
/// standard stream is used, which is what a service supervisor captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "shien_core=trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append-only file for normal output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_log: Option<String>,

    /// Append-only file for warnings and errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_log: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout_log: None,
            stderr_log: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. A file that exists but fails to parse or
    /// validate is still an error.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.grace_period_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.grace_period_secs must be non-zero".to_string(),
            ));
        }
        if let Some(path) = &self.daemon.socket_path {
            if path.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "daemon.socket_path must not be empty when set".to_string(),
                ));
            }
        }
        if self.client.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }
        for (key, value) in [
            ("logging.stdout_log", &self.logging.stdout_log),
            ("logging.stderr_log", &self.logging.stderr_log),
        ] {
            if value.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "{key} must not be empty when set"
                )));
            }
        }
        Ok(())
    }

    /// The control socket path: the configured override, or the data
    /// directory default.
    pub fn socket_path(&self, data_dir: &DataDir) -> Result<PathBuf, ConfigError> {
        match &self.daemon.socket_path {
            Some(path) => paths::expand_home(Path::new(path)),
            None => Ok(data_dir.socket_file()),
        }
    }

    /// Draining grace period.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.daemon.grace_period_secs)
    }

    /// Client request timeout.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.socket_path, None);
        assert_eq!(config.daemon.grace_period_secs, 5);
        assert_eq!(config.client.timeout_ms, 5_000);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.stdout_log.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [daemon]
            socket_path = "/run/shien/shien.sock"
            grace_period_secs = 10

            [client]
            timeout_ms = 250

            [logging]
            level = "debug"
            stdout_log = "/var/log/shien.log"
            stderr_log = "/var/log/shien.err.log"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(
            config.daemon.socket_path.as_deref(),
            Some("/run/shien/shien.sock")
        );
        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.client_timeout(), Duration::from_millis(250));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.stderr_log.as_deref(),
            Some("/var/log/shien.err.log")
        );
    }

    #[test]
    fn test_validation_rejects_zero_grace_period() {
        let toml = r#"
            [daemon]
            grace_period_secs = 0
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("daemon.grace_period_secs"));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let toml = r#"
            [client]
            timeout_ms = 0
        "#;
        assert!(matches!(
            AppConfig::parse(toml),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_blank_paths() {
        let toml = r#"
            [daemon]
            socket_path = "  "
        "#;
        assert!(AppConfig::parse(toml).is_err());

        let toml = r#"
            [logging]
            stdout_log = ""
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("logging.stdout_log"));
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        let toml = r#"
            [daemon]
            grace_period_secs = "soon"
        "#;
        assert!(matches!(AppConfig::parse(toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_socket_path_default_and_override() {
        let data_dir = DataDir::at("/data");
        let config = AppConfig::default();
        assert_eq!(
            config.socket_path(&data_dir).unwrap(),
            PathBuf::from("/data/shien.sock")
        );

        let mut config = AppConfig::default();
        config.daemon.socket_path = Some("/tmp/other.sock".to_string());
        assert_eq!(
            config.socket_path(&data_dir).unwrap(),
            PathBuf::from("/tmp/other.sock")
        );
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(&tmp.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_load_or_default_invalid_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "[client]\ntimeout_ms = 0\n")
            .await
            .unwrap();
        assert!(AppConfig::load_or_default(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "[logging]\nlevel = \"warn\"\n")
            .await
            .unwrap();
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = AppConfig::default();
        config.daemon.socket_path = Some("/tmp/s.sock".to_string());
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("grace_period_secs"));
        assert_eq!(AppConfig::parse(&rendered).unwrap(), config);
    }
}
