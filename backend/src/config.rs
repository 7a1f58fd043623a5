//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mcp::event_log::{DEFAULT_MAX_EVENTS, DEFAULT_REPLAY_FALLBACK};
use crate::mcp::executor::catalog_streaming_tools;
use crate::mcp::session::SessionLimits;
use crate::mcp::sweeper::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_SESSION_TIMEOUT};
use crate::mcp::tasks::DEFAULT_MAX_CHECKPOINTS;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    sessions: SessionsConfig,
    #[serde(default)]
    streaming: StreamingConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionsConfig {
    /// Inactivity timeout before a session is evicted
    timeout_secs: u64,
    /// How often the sweeper runs
    cleanup_interval_secs: u64,
    /// Events retained per session for replay
    max_events: usize,
    /// Events replayed when a Last-Event-ID cannot be resolved
    replay_fallback: usize,
    /// Checkpoints retained per task
    max_checkpoints: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SESSION_TIMEOUT.as_secs(),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL.as_secs(),
            max_events: DEFAULT_MAX_EVENTS,
            replay_fallback: DEFAULT_REPLAY_FALLBACK,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamingConfig {
    /// Tools answered with an SSE stream
    tools: Vec<String>,
    /// Optional deadline for a streamed collaborator call
    task_deadline_secs: Option<u64>,
    keep_alive_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tools: catalog_streaming_tools(),
            task_deadline_secs: None,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    tether_types::DEFAULT_PORT
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session lifetime and retention settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub cleanup_interval: Duration,
    pub limits: SessionLimits,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SESSION_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            limits: SessionLimits::default(),
        }
    }
}

/// Streaming behaviour of `tools/call`.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    /// Allow-list of tools answered with an SSE stream
    pub tools: Vec<String>,
    /// Fail a streamed task whose collaborator call runs longer than this
    pub task_deadline: Option<Duration>,
    /// Interval of SSE keep-alive comments
    pub keep_alive: Duration,
}

impl StreamingSettings {
    pub fn is_streaming_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            tools: catalog_streaming_tools(),
            task_deadline: None,
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    pub sessions: SessionSettings,
    pub streaming: StreamingSettings,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are merged in this order:
    /// 1. `config.toml` in user config directory (~/.config/tether/ on Linux)
    /// 2. `.tether.toml` in current directory
    /// 3. the explicit `config_file`, if given
    pub fn from_figment(
        host: Option<String>,
        port: Option<u16>,
        log_level: Option<String>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".tether.toml"));
        let user_config = directories::ProjectDirs::from("", "", "tether")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // 1. Start with defaults
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile {
            server: ServerConfig::default(),
            sessions: SessionsConfig::default(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }));

        // 2. Merge config files that exist
        for path in [user_config.as_deref(), local_config.as_deref()]
            .into_iter()
            .flatten()
        {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        // 3. Merge environment variables (TETHER_SECTION__KEY)
        figment = figment.merge(Env::prefixed("TETHER_").split("__"));

        // 4. Merge CLI arguments (highest priority)
        if let Some(ref h) = host {
            figment = figment.merge(Serialized::default("server.host", h));
        }
        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref level) = log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        let config_file: ConfigFile = figment.extract().map_err(Box::new)?;
        Self::from_file(config_file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let sessions = file.sessions;
        if file.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if sessions.timeout_secs == 0 || sessions.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sessions.timeout_secs and sessions.cleanup_interval_secs must be positive".into(),
            ));
        }
        if sessions.max_events == 0 || sessions.max_checkpoints == 0 {
            return Err(ConfigError::Invalid(
                "sessions.max_events and sessions.max_checkpoints must be positive".into(),
            ));
        }
        if file.streaming.task_deadline_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "streaming.task_deadline_secs must be positive when set".into(),
            ));
        }

        Ok(Self {
            host: file.server.host,
            port: file.server.port,
            sessions: SessionSettings {
                timeout: Duration::from_secs(sessions.timeout_secs),
                cleanup_interval: Duration::from_secs(sessions.cleanup_interval_secs),
                limits: SessionLimits {
                    max_events: sessions.max_events,
                    replay_fallback: sessions.replay_fallback,
                    max_checkpoints: sessions.max_checkpoints,
                },
            },
            streaming: StreamingSettings {
                tools: file.streaming.tools,
                task_deadline: file.streaming.task_deadline_secs.map(Duration::from_secs),
                keep_alive: Duration::from_secs(file.streaming.keep_alive_secs.max(1)),
            },
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sessions: SessionSettings::default(),
            streaming: StreamingSettings::default(),
            log_file: None,
            log_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    /// Run `f` inside `dir` with the given TETHER_* variables set.
    fn with_env<T>(dir: &Path, vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        for (key, value) in vars {
            std::env::set_var(key, value);
        }

        let result = f();

        for (key, _) in vars {
            std::env::remove_var(key);
        }
        let _ = std::env::set_current_dir(original_dir);
        result
    }

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = with_env(temp_dir.path(), &[], || {
            Config::from_figment(None, None, None, None).unwrap()
        });

        assert_eq!(config.port, tether_types::DEFAULT_PORT);
        assert_eq!(config.sessions.timeout, Duration::from_secs(1800));
        assert_eq!(config.sessions.cleanup_interval, Duration::from_secs(300));
        assert_eq!(config.sessions.limits.max_events, 1000);
        assert_eq!(config.sessions.limits.replay_fallback, 20);
        assert_eq!(config.sessions.limits.max_checkpoints, 50);
        assert!(config.streaming.task_deadline.is_none());
        assert!(config.streaming.is_streaming_tool("analyze_project"));
    }

    #[test]
    #[serial]
    fn test_from_figment_config_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".tether.toml"),
            r#"
[server]
port = 7777

[sessions]
timeout_secs = 60

[streaming]
tools = ["slow_tool"]
task_deadline_secs = 5
"#,
        )
        .unwrap();

        let config = with_env(temp_dir.path(), &[], || {
            Config::from_figment(None, None, None, None).unwrap()
        });

        assert_eq!(config.port, 7777);
        assert_eq!(config.sessions.timeout, Duration::from_secs(60));
        assert_eq!(config.streaming.tools, vec!["slow_tool".to_string()]);
        assert_eq!(config.streaming.task_deadline, Some(Duration::from_secs(5)));
    }

    #[test]
    #[serial]
    fn test_env_vars_override_config_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".tether.toml"), "[server]\nport = 7777").unwrap();

        let config = with_env(
            temp_dir.path(),
            &[
                ("TETHER_SERVER__PORT", "8888"),
                ("TETHER_SESSIONS__MAX_EVENTS", "10"),
            ],
            || Config::from_figment(None, None, None, None).unwrap(),
        );

        assert_eq!(config.port, 8888);
        assert_eq!(config.sessions.limits.max_events, 10);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env_and_config() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".tether.toml"), "[server]\nport = 7777").unwrap();

        let config = with_env(temp_dir.path(), &[("TETHER_SERVER__PORT", "8888")], || {
            Config::from_figment(
                Some("127.0.0.1".to_string()),
                Some(9999),
                Some("debug".to_string()),
                None,
            )
            .unwrap()
        });

        assert_eq!(config.port, 9999);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_explicit_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "[sessions]\ncleanup_interval_secs = 42").unwrap();

        let config = with_env(temp_dir.path(), &[], || {
            Config::from_figment(None, None, None, Some(&path)).unwrap()
        });
        assert_eq!(config.sessions.cleanup_interval, Duration::from_secs(42));

        let missing = temp_dir.path().join("missing.toml");
        let err = with_env(temp_dir.path(), &[], || {
            Config::from_figment(None, None, None, Some(&missing)).unwrap_err()
        });
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    #[serial]
    fn test_rejects_zero_limits() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".tether.toml"),
            "[sessions]\nmax_events = 0",
        )
        .unwrap();

        let err = with_env(temp_dir.path(), &[], || {
            Config::from_figment(None, None, None, None).unwrap_err()
        });
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
