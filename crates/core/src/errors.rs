//! Error types for the integrasync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Operator input rejected before reaching storage.
    #[error("invalid {field}: {detail}")]
    InvalidInput { field: String, detail: String },
}

impl CoreError {
    pub fn invalid(field: &str, detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector errors
// ---------------------------------------------------------------------------

/// Errors raised while talking to an external system.
///
/// Every variant names the system and the endpoint that was called so the
/// resulting event message is actionable on its own.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The request did not complete within its timeout.
    #[error("connection to '{system}' timed out ({endpoint})")]
    Timeout { system: String, endpoint: String },

    /// Transport-level failure (DNS, TLS, refused connection, ...).
    #[error("connection to '{system}' failed ({endpoint}): {detail}")]
    Transport {
        system: String,
        endpoint: String,
        detail: String,
    },

    /// The system answered with a non-success status code.
    #[error("'{system}' returned HTTP {status} ({endpoint}): {body}")]
    Status {
        system: String,
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The response body was not a JSON object or array of objects.
    #[error("'{system}' returned an unreadable payload ({endpoint}): {detail}")]
    InvalidPayload {
        system: String,
        endpoint: String,
        detail: String,
    },
}

impl ConnectorError {
    /// Build a connector error from a `reqwest` failure.
    pub fn from_reqwest(system: &str, endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                system: system.to_string(),
                endpoint: endpoint.to_string(),
            }
        } else {
            Self::Transport {
                system: system.to_string(),
                endpoint: endpoint.to_string(),
                detail: err.to_string(),
            }
        }
    }

    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short machine-readable kind, stored in event error details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "http_status",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping errors
// ---------------------------------------------------------------------------

/// Errors from the record mapper.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// A mapping marked as required found no value in the source record.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A transformation rule could not be parsed when the mapping was created.
    #[error("invalid transformation rule for '{field}': {detail}")]
    InvalidRule { field: String, detail: String },
}

// ---------------------------------------------------------------------------
// Sync orchestration errors
// ---------------------------------------------------------------------------

/// Errors from one orchestration run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetch or push against an external system failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// A record could not be mapped.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// One of the task's systems is switched off.
    #[error("system '{name}' is inactive")]
    SystemInactive { name: String },
}

impl SyncError {
    /// Short machine-readable kind, stored in event error details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connector(_) => "connection_error",
            Self::Mapping(MappingError::MissingRequiredField { .. }) => "missing_required_field",
            Self::Mapping(MappingError::InvalidRule { .. }) => "invalid_rule",
            Self::SystemInactive { .. } => "system_inactive",
        }
    }
}

// ---------------------------------------------------------------------------
// Task runner errors
// ---------------------------------------------------------------------------

/// Errors from the task runner and the control surface on top of it.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A run of this task is already in progress.
    #[error("task {task_id} is already running")]
    ConcurrentRunConflict { task_id: String },

    /// The job queue has been shut down.
    #[error("job queue is closed")]
    QueueClosed,

    /// Database error while loading or updating the task.
    #[error("runner database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A uniqueness or reference constraint was violated.
    #[error("{entity} rejected: {detail}")]
    Constraint { entity: String, detail: String },

    /// A stored value could not be decoded.
    #[error("corrupt {entity} row {id}: {detail}")]
    Corrupt {
        entity: String,
        id: String,
        detail: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
