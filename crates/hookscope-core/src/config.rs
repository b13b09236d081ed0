//! Configuration loading and typed config structures for hookscope.
//!
//! Configuration lives in a YAML file (`hookscope.yaml` by default).
//! Every field has a default, so a missing file or a partial file is
//! fine. A handful of environment variables override the file so that
//! deployments can relocate logs and ports without editing YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unusable value.
    #[error("invalid environment override {name}: {message}")]
    Env {
        /// The variable name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level hookscope configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HookscopeConfig {
    /// HTTP / stream server settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Log file discovery and tailing.
    #[serde(default)]
    pub tailer: TailerConfig,

    /// Event window settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Session state persistence.
    #[serde(default)]
    pub hierarchy: HierarchyConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HookscopeConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// A file that does not exist yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Env`] if an override is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_yml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override selected settings from the environment.
    ///
    /// - `HOOKSCOPE_LOG_DIR` -- `tailer.log_dir`
    /// - `HOOKSCOPE_PORT` -- `server.port`
    /// - `HOOKSCOPE_SESSION_STATE` -- `hierarchy.state_path`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("HOOKSCOPE_LOG_DIR") {
            self.tailer.log_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("HOOKSCOPE_PORT") {
            self.server.port = val.parse().map_err(|e| ConfigError::Env {
                name: "HOOKSCOPE_PORT",
                message: format!("{e}"),
            })?;
        }
        if let Ok(val) = std::env::var("HOOKSCOPE_SESSION_STATE") {
            self.hierarchy.state_path = PathBuf::from(val);
        }
        Ok(())
    }
}

/// Server bind settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log discovery and tailing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TailerConfig {
    /// Directory producers write period log files into.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// File name per period. `{date}` becomes the local date `YYYY-MM-DD`.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Polling interval while the active file does not exist yet.
    #[serde(default = "default_missing_poll_secs")]
    pub missing_poll_secs: u64,

    /// How often to check whether the period rolled over.
    #[serde(default = "default_rollover_check_secs")]
    pub rollover_check_secs: u64,
}

impl TailerConfig {
    /// Polling interval as a [`Duration`].
    pub const fn missing_poll(&self) -> Duration {
        Duration::from_secs(self.missing_poll_secs)
    }

    /// Rollover check interval as a [`Duration`].
    pub const fn rollover_check(&self) -> Duration {
        Duration::from_secs(self.rollover_check_secs)
    }
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            file_pattern: default_file_pattern(),
            missing_poll_secs: default_missing_poll_secs(),
            rollover_check_secs: default_rollover_check_secs(),
        }
    }
}

/// Event window settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of events held in memory (the window size N).
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Cap on session ids returned by the filter-options query.
    #[serde(default = "default_session_sample")]
    pub session_sample: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            session_sample: default_session_sample(),
        }
    }
}

/// Session state persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HierarchyConfig {
    /// JSON file holding the persisted session map.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Maximum number of tracked sessions before LRU eviction.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    4000
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_file_pattern() -> String {
    "events-{date}.jsonl".to_owned()
}

const fn default_missing_poll_secs() -> u64 {
    5
}

const fn default_rollover_check_secs() -> u64 {
    60
}

const fn default_max_events() -> usize {
    1000
}

const fn default_session_sample() -> usize {
    300
}

fn default_state_path() -> PathBuf {
    PathBuf::from("logs/session-state.json")
}

const fn default_max_sessions() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HookscopeConfig::default();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.store.max_events, 1000);
        assert_eq!(config.hierarchy.max_sessions, 100);
        assert_eq!(config.tailer.missing_poll(), Duration::from_secs(5));
        assert_eq!(config.tailer.file_pattern, "events-{date}.jsonl");
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
server:
  port: 9000
store:
  max_events: 50
tailer:
  log_dir: /var/log/hooks
  rollover_check_secs: 10
logging:
  json: true
";
        let config = HookscopeConfig::parse(yaml).unwrap_or_default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.max_events, 50);
        assert_eq!(config.store.session_sample, 300);
        assert_eq!(config.tailer.log_dir, PathBuf::from("/var/log/hooks"));
        assert_eq!(config.tailer.rollover_check(), Duration::from_secs(10));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = HookscopeConfig::parse("{}").unwrap_or_default();
        assert_eq!(config, HookscopeConfig::default());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(HookscopeConfig::parse("server: [unclosed").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().ok();
        let path = dir
            .as_ref()
            .map(|d| d.path().join("absent.yaml"))
            .unwrap_or_default();
        let config = HookscopeConfig::load(&path);
        assert!(config.is_ok());
    }
}
