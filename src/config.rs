//! Server configuration.
//!
//! Configuration is read from a TOML or JSON file. Field names are camelCase
//! so existing `config.json` files load unchanged:
//!
//! ```toml
//! serverPort = 8080
//! diagnosticPort = 8081
//! maxConnections = 100
//! maxStackSize = 100
//! staleConnectionPeriodSeconds = 10
//! logDirectory = "logs"
//!
//! [logging.development]
//! logConsole = true
//! logLevel = "silly"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::{LifoError, Result};
use crate::session::{AdmissionPolicy, DEFAULT_MAX_CONNECTIONS, DEFAULT_STALE_CONNECTION_PERIOD};
use crate::stack::DEFAULT_MAX_STACK_SIZE;

/// Environment used when none is given.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Log verbosity. Accepts the legacy `silly` and `verbose` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[serde(alias = "silly")]
    Trace,
    #[serde(alias = "verbose")]
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Matching tracing filter.
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Logging settings for one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Mirror log output to stderr.
    #[serde(default)]
    pub log_console: bool,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Stack protocol port.
    pub server_port: u16,

    /// Diagnostics port.
    pub diagnostic_port: u16,

    /// Interface both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,

    /// Age after which the oldest session may be evicted for a newcomer.
    #[serde(default = "default_stale_period")]
    pub stale_connection_period_seconds: u64,

    /// Hard per-session lifetime. Absent or 0 disables it.
    #[serde(default)]
    pub session_timeout_seconds: Option<u64>,

    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// Logging settings keyed by environment name.
    #[serde(default)]
    pub logging: HashMap<String, LoggingConfig>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_max_stack_size() -> usize {
    DEFAULT_MAX_STACK_SIZE
}

fn default_stale_period() -> u64 {
    DEFAULT_STALE_CONNECTION_PERIOD.as_secs()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

impl Config {
    /// Load from a file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_stack_size == 0 {
            return Err(LifoError::Config("maxStackSize must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(LifoError::Config(
                "maxConnections must be at least 1".into(),
            ));
        }
        if self.bind_address.is_empty() {
            return Err(LifoError::Config("bindAddress must not be empty".into()));
        }
        Ok(())
    }

    /// Logging settings for `env`, or defaults if the environment has none.
    pub fn logging_for(&self, env: &str) -> LoggingConfig {
        self.logging.get(env).cloned().unwrap_or_default()
    }

    pub fn stale_connection_period(&self) -> Duration {
        Duration::from_secs(self.stale_connection_period_seconds)
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            max_connections: self.max_connections,
            stale_period: self.stale_connection_period(),
        }
    }
}

/// Pick the environment name: explicit value, then `LIFO_ENV`, then
/// `NODE_ENV`, then [`DEFAULT_ENVIRONMENT`].
pub fn resolve_environment(explicit: Option<&str>) -> String {
    resolve_environment_from(explicit, |key| std::env::var(key).ok())
}

fn resolve_environment_from<F>(explicit: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .map(str::to_string)
        .or_else(|| lookup("LIFO_ENV"))
        .or_else(|| lookup("NODE_ENV"))
        .filter(|env| !env.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JSON: &str = r#"{
        "serverPort": 8080,
        "diagnosticPort": 8081,
        "maxConnections": 100,
        "maxStackSize": 100,
        "staleConnectionPeriodSeconds": 10,
        "logDirectory": "/var/log/lifo",
        "logging": {
            "development": { "logConsole": true, "logLevel": "silly" },
            "production": { "logConsole": false, "logLevel": "info" }
        }
    }"#;

    #[test]
    fn test_parse_json_config() {
        let config = Config::from_json(JSON).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.diagnostic_port, 8081);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.stale_connection_period(), Duration::from_secs(10));
        assert_eq!(config.log_directory, PathBuf::from("/var/log/lifo"));
        assert_eq!(config.bind_address, "0.0.0.0");

        let dev = config.logging_for("development");
        assert!(dev.log_console);
        assert_eq!(dev.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let config = Config::from_toml("serverPort = 9000\ndiagnosticPort = 9001\n").unwrap();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.max_stack_size, DEFAULT_MAX_STACK_SIZE);
        assert_eq!(config.log_directory, PathBuf::from("logs"));
        assert!(config.session_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_port_is_error() {
        let result = Config::from_toml("diagnosticPort = 9001\n");
        assert!(matches!(result, Err(LifoError::ConfigParse(_))));
    }

    #[test]
    fn test_legacy_level_names() {
        let parse = |s: &str| -> LogLevel { serde_json::from_str(&format!("\"{s}\"")).unwrap() };
        assert_eq!(parse("silly"), LogLevel::Trace);
        assert_eq!(parse("verbose"), LogLevel::Debug);
        assert_eq!(parse("debug"), LogLevel::Debug);
        assert_eq!(parse("warn"), LogLevel::Warn);
        assert_eq!(parse("error").as_filter(), LevelFilter::ERROR);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::from_json(JSON).unwrap();
        config.max_stack_size = 0;
        assert!(matches!(config.validate(), Err(LifoError::Config(_))));

        config.max_stack_size = 1;
        config.max_connections = 0;
        assert!(matches!(config.validate(), Err(LifoError::Config(_))));
    }

    #[test]
    fn test_session_timeout_zero_disables() {
        let mut config = Config::from_json(JSON).unwrap();
        config.session_timeout_seconds = Some(0);
        assert!(config.session_timeout().is_none());

        config.session_timeout_seconds = Some(30);
        assert_eq!(config.session_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_unknown_environment_uses_default_logging() {
        let config = Config::from_json(JSON).unwrap();
        assert_eq!(config.logging_for("staging"), LoggingConfig::default());
    }

    #[test]
    fn test_admission_policy_from_config() {
        let config = Config::from_json(JSON).unwrap();
        let policy = config.admission_policy();
        assert_eq!(policy.max_connections, 100);
        assert_eq!(policy.stale_period, Duration::from_secs(10));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("config.json");
        std::fs::File::create(&json_path)
            .unwrap()
            .write_all(JSON.as_bytes())
            .unwrap();
        assert_eq!(Config::from_file(&json_path).unwrap().server_port, 8080);

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "serverPort = 1\ndiagnosticPort = 2\n").unwrap();
        assert_eq!(Config::from_file(&toml_path).unwrap().diagnostic_port, 2);

        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::from_file(&missing), Err(LifoError::Io(_))));
    }

    #[test]
    fn test_environment_resolution_order() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |key: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            }
        };

        assert_eq!(
            resolve_environment_from(Some("cli"), env(&[("LIFO_ENV", "lifo")])),
            "cli"
        );
        assert_eq!(
            resolve_environment_from(None, env(&[("LIFO_ENV", "lifo"), ("NODE_ENV", "node")])),
            "lifo"
        );
        assert_eq!(
            resolve_environment_from(None, env(&[("NODE_ENV", "production")])),
            "production"
        );
        assert_eq!(resolve_environment_from(None, env(&[])), DEFAULT_ENVIRONMENT);
    }
}
