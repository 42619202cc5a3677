//! Domain model types used throughout integrasync.
//!
//! These types bridge the task runner, the database layer, and the web API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::transform::TransformRule;

/// A raw record as produced by a source system: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// What a system returns from `GET /data` and accepts on `POST /data`.
///
/// A batch is either an ordered sequence of records or a single record, and
/// mapping preserves whichever shape came in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Batch {
    Many(Vec<Record>),
    One(Record),
}

impl Batch {
    /// Number of records a push of this batch writes.
    pub fn len(&self) -> usize {
        match self {
            Self::Many(records) => records.len(),
            Self::One(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Sync direction
// ---------------------------------------------------------------------------

/// Which way records flow between the task's two systems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    #[serde(rename = "a_to_b")]
    AToB,
    #[serde(rename = "b_to_a")]
    BToA,
    #[serde(rename = "bidirectional")]
    Bidirectional,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AToB => "a_to_b",
            Self::BToA => "b_to_a",
            Self::Bidirectional => "bidirectional",
        }
    }

    /// Whether records are pushed from system A into system B.
    pub fn includes_a_to_b(&self) -> bool {
        matches!(self, Self::AToB | Self::Bidirectional)
    }

    /// Whether records are pushed from system B into system A.
    pub fn includes_b_to_a(&self) -> bool {
        matches!(self, Self::BToA | Self::Bidirectional)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a_to_b" => Ok(Self::AToB),
            "b_to_a" => Ok(Self::BToA),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle state of an integration task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

/// Kind of an integration event log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SyncStart,
    SyncComplete,
    Error,
    DataMismatch,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncStart => "sync_start",
            Self::SyncComplete => "sync_complete",
            Self::Error => "error",
            Self::DataMismatch => "data_mismatch",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_start" => Ok(Self::SyncStart),
            "sync_complete" => Ok(Self::SyncComplete),
            "error" => Ok(Self::Error),
            "data_mismatch" => Ok(Self::DataMismatch),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// External system
// ---------------------------------------------------------------------------

/// An external system records are fetched from or pushed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSystem {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Base URL; `/data` and `/health` are appended to it.
    pub api_endpoint: String,
    /// Bearer token sent on every call.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalSystem {
    /// Full URL of an endpoint below the system's base URL.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Input for registering a new external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSystem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub api_endpoint: String,
    pub api_key: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Integration task
// ---------------------------------------------------------------------------

/// A configured synchronization between two external systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTask {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_a_id: String,
    pub system_b_id: String,
    pub direction: Direction,
    pub status: TaskStatus,
    pub schedule_enabled: bool,
    /// Minimum minutes between scheduled runs.
    pub schedule_interval: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl IntegrationTask {
    /// Whether the periodic scan should start this task at `now`.
    ///
    /// Tasks without an interval are due on every scan.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.schedule_enabled || self.status == TaskStatus::Running {
            return false;
        }
        match (self.schedule_interval, self.last_run) {
            (Some(minutes), Some(last_run)) => last_run + Duration::minutes(minutes as i64) <= now,
            _ => true,
        }
    }
}

/// Input for creating a new integration task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_a_id: String,
    pub system_b_id: String,
    pub direction: Direction,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub schedule_interval: Option<u32>,
}

// ---------------------------------------------------------------------------
// Data mapping
// ---------------------------------------------------------------------------

/// Maps one source field onto one target field, optionally transforming it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMapping {
    pub id: String,
    pub task_id: String,
    pub field_a: String,
    pub field_b: String,
    pub transformation_rule: Option<TransformRule>,
    pub is_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for adding a mapping to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMapping {
    pub field_a: String,
    pub field_b: String,
    #[serde(default)]
    pub transformation_rule: Option<TransformRule>,
    #[serde(default = "default_true")]
    pub is_required: bool,
}

// ---------------------------------------------------------------------------
// Integration event
// ---------------------------------------------------------------------------

/// An append-only log entry produced by a task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub id: i64,
    pub task_id: String,
    pub event_type: EventType,
    pub message: String,
    pub error_details: Option<serde_json::Value>,
    pub records_synced: i64,
    /// Run duration in seconds.
    pub sync_duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// An event about to be appended to the log.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub task_id: String,
    pub event_type: EventType,
    pub message: String,
    pub error_details: Option<serde_json::Value>,
    pub records_synced: i64,
    pub sync_duration: Option<f64>,
}

impl NewEvent {
    pub fn sync_start(task_id: &str, attempt: u32) -> Self {
        let message = if attempt == 0 {
            "sync started".to_string()
        } else {
            format!("sync started (retry {})", attempt)
        };
        Self {
            task_id: task_id.to_string(),
            event_type: EventType::SyncStart,
            message,
            error_details: None,
            records_synced: 0,
            sync_duration: None,
        }
    }

    pub fn sync_complete(task_id: &str, records_synced: u64, duration_secs: f64) -> Self {
        Self {
            task_id: task_id.to_string(),
            event_type: EventType::SyncComplete,
            message: format!("sync completed, {} record(s) synced", records_synced),
            error_details: None,
            records_synced: records_synced as i64,
            sync_duration: Some(duration_secs),
        }
    }

    pub fn error(task_id: &str, message: String, details: serde_json::Value) -> Self {
        Self {
            task_id: task_id.to_string(),
            event_type: EventType::Error,
            message,
            error_details: Some(details),
            records_synced: 0,
            sync_duration: None,
        }
    }
}

/// Filter for browsing the global event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<EventType>,
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Operator overview of all tasks and the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub running_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub total_events: i64,
    pub recent_errors: Vec<IntegrationEvent>,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(schedule_interval: Option<u32>, last_run: Option<DateTime<Utc>>) -> IntegrationTask {
        IntegrationTask {
            id: "t".into(),
            name: "t".into(),
            description: String::new(),
            system_a_id: "a".into(),
            system_b_id: "b".into(),
            direction: Direction::AToB,
            status: TaskStatus::Completed,
            schedule_enabled: true,
            schedule_interval,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run,
        }
    }

    #[test]
    fn test_direction_wire_names() {
        assert_eq!(serde_json::to_string(&Direction::AToB).unwrap(), "\"a_to_b\"");
        assert_eq!("b_to_a".parse::<Direction>().unwrap(), Direction::BToA);
        assert!(Direction::Bidirectional.includes_a_to_b());
        assert!(Direction::Bidirectional.includes_b_to_a());
        assert!(!Direction::AToB.includes_b_to_a());
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_batch_shapes() {
        let many: Batch = serde_json::from_str(r#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(many.len(), 2);
        let one: Batch = serde_json::from_str(r#"{"a":1}"#).unwrap();
        assert!(matches!(one, Batch::One(_)));
        assert_eq!(one.len(), 1);
        assert!(serde_json::from_str::<Batch>("[1, 2]").is_err());
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let system = ExternalSystem {
            id: "s".into(),
            name: "crm".into(),
            description: String::new(),
            api_endpoint: "https://crm.example.com/api/".into(),
            api_key: "k".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(system.endpoint_url("data"), "https://crm.example.com/api/data");
        assert!(!serde_json::to_string(&system).unwrap().contains("api_key"));
    }

    #[test]
    fn test_task_is_due() {
        let now = Utc::now();
        assert!(task(None, Some(now)).is_due(now));
        assert!(task(Some(30), None).is_due(now));
        assert!(!task(Some(30), Some(now - Duration::minutes(10))).is_due(now));
        assert!(task(Some(30), Some(now - Duration::minutes(31))).is_due(now));

        let mut running = task(None, None);
        running.status = TaskStatus::Running;
        assert!(!running.is_due(now));

        let mut disabled = task(None, None);
        disabled.schedule_enabled = false;
        assert!(!disabled.is_due(now));
    }
}
