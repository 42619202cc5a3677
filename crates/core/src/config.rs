//! TOML-based configuration system for integrasync.
//!
//! Secrets for seeded systems can be kept out of the file: a `[[systems]]`
//! entry may name an environment variable in `api_key_env` instead of
//! carrying `api_key` inline. The variables are read by
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / scheduling settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Worker pool and retry policy.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// HTTP connector timeouts.
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Web API settings.
    #[serde(default)]
    pub web: WebConfig,

    /// External systems upserted into the database at daemon start.
    #[serde(default)]
    pub systems: Vec<SystemSeed>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon / scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scans for due scheduled tasks (default 900).
    #[serde(default = "default_scan_interval")]
    pub scheduled_scan_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the SQLite database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_scan_interval() -> u64 {
    15 * 60
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/integrasync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scheduled_scan_interval_secs: default_scan_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    /// Path of the SQLite database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("integrasync.db")
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Worker pool and retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of concurrent task workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Automatic retries after a failed run.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff; retry `n` waits `n * retry_backoff_secs`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Capacity of the job queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    256
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// HTTP connector timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Timeout for `GET /data` and `POST /data` (default 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for `GET /health` (default 10).
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    10
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// Web API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ---------------------------------------------------------------------------
// Seeded systems
// ---------------------------------------------------------------------------

/// An external system declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSeed {
    /// Unique name; used to match the existing database row on upsert.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Base URL of the system's API.
    pub api_endpoint: String,

    /// Inline bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `api_key_env` references of seeded systems.
    ///
    /// An inline `api_key` wins over `api_key_env`. A seed that has neither
    /// an inline key nor a set variable is an error, since the system could
    /// never authenticate.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        for (idx, seed) in self.systems.iter_mut().enumerate() {
            if seed.api_key.is_some() {
                continue;
            }
            let field = format!("systems[{}].api_key_env", idx);
            let Some(env_name) = seed.api_key_env.as_deref() else {
                return Err(ConfigError::InvalidValue {
                    field: format!("systems[{}]", idx),
                    detail: "either api_key or api_key_env must be set".into(),
                });
            };
            match resolve_optional_env(env_name, &field) {
                Some(value) => seed.api_key = Some(value),
                None => {
                    return Err(ConfigError::EnvVarMissing {
                        var: env_name.to_string(),
                        field,
                    })
                }
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.scheduled_scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.scheduled_scan_interval_secs".into(),
                detail: "scan interval must be > 0".into(),
            });
        }
        if self.runner.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "runner.workers".into(),
                detail: "at least one worker is required".into(),
            });
        }
        if self.runner.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "runner.queue_capacity".into(),
                detail: "queue capacity must be > 0".into(),
            });
        }
        if self.connector.request_timeout_secs == 0 || self.connector.health_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connector".into(),
                detail: "timeouts must be > 0".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for (idx, seed) in self.systems.iter().enumerate() {
            if seed.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("systems[{}].name", idx),
                    detail: "system name must not be empty".into(),
                });
            }
            if !seen.insert(seed.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("systems[{}].name", idx),
                    detail: format!("duplicate system name '{}'", seed.name),
                });
            }
            if !(seed.api_endpoint.starts_with("http://") || seed.api_endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: format!("systems[{}].api_endpoint", idx),
                    detail: "endpoint must be an http(s) URL".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
