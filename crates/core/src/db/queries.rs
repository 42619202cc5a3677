//! Typed query helpers for every table in the integrasync database.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    DashboardSummary, DataMapping, EventFilter, ExternalSystem, IntegrationEvent,
    IntegrationTask, NewEvent, NewMapping, NewSystem, NewTask, PaginatedResult, Pagination,
    TaskStatus,
};
use crate::transform::TransformRule;

/// Number of error events shown on the dashboard.
pub const RECENT_ERROR_LIMIT: u32 = 10;

const SYSTEM_COLUMNS: &str =
    "id, name, description, api_endpoint, api_key, is_active, created_at, updated_at";

const TASK_COLUMNS: &str = "id, name, description, system_a_id, system_b_id, direction, status,
     schedule_enabled, schedule_interval, created_at, updated_at, last_run";

const MAPPING_COLUMNS: &str =
    "id, task_id, field_a, field_b, transformation_rule, is_required, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, task_id, event_type, message, error_details, records_synced,
     sync_duration, created_at";

/// Outcome of trying to move a task into `running`.
#[derive(Debug, Clone)]
pub enum TaskClaim {
    /// The task was not running and now is; carries the updated row.
    Claimed(IntegrationTask),
    /// Another run holds the task.
    AlreadyRunning,
}

/// Outcome of trying to delete a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDeletion {
    Deleted,
    /// The task is running; nothing was removed.
    Running,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- systems ------------------------------------------------------------

    /// Register a new external system.
    pub fn insert_system(&self, new: &NewSystem) -> Result<ExternalSystem, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO systems (id, name, description, api_endpoint, api_key, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![id, new.name, new.description, new.api_endpoint, new.api_key, new.is_active, now],
        )
        .map_err(|e| constraint_error("system", e))?;
        debug!(id = %id, name = %new.name, "inserted system");
        fetch_system(&conn, &id)
    }

    /// Get a system by ID.
    pub fn get_system(&self, id: &str) -> Result<ExternalSystem, DatabaseError> {
        let conn = self.conn();
        fetch_system(&conn, id)
    }

    /// Look up a system by its unique name.
    pub fn find_system_by_name(&self, name: &str) -> Result<Option<ExternalSystem>, DatabaseError> {
        let conn = self.conn();
        let system = conn
            .query_row(
                &format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE name = ?1"),
                params![name],
                system_from_row,
            )
            .optional()?;
        Ok(system)
    }

    /// List all systems ordered by name.
    pub fn list_systems(&self) -> Result<Vec<ExternalSystem>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {SYSTEM_COLUMNS} FROM systems ORDER BY name"))?;
        let systems = stmt
            .query_map([], system_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(systems)
    }

    /// Replace the mutable fields of a system.
    pub fn update_system(&self, id: &str, update: &NewSystem) -> Result<ExternalSystem, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE systems SET name = ?1, description = ?2, api_endpoint = ?3, api_key = ?4,
                 is_active = ?5, updated_at = ?6 WHERE id = ?7",
                params![
                    update.name,
                    update.description,
                    update.api_endpoint,
                    update.api_key,
                    update.is_active,
                    now,
                    id
                ],
            )
            .map_err(|e| constraint_error("system", e))?;
        if changed == 0 {
            return Err(not_found("system", id));
        }
        debug!(id, "updated system");
        fetch_system(&conn, id)
    }

    /// Insert a system, or update the existing one with the same name.
    pub fn upsert_system(&self, new: &NewSystem) -> Result<ExternalSystem, DatabaseError> {
        match self.find_system_by_name(&new.name)? {
            Some(existing) => self.update_system(&existing.id, new),
            None => self.insert_system(new),
        }
    }

    /// Delete a system. Fails with a constraint error while tasks reference it.
    pub fn delete_system(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM systems WHERE id = ?1", params![id])
            .map_err(|e| constraint_error("system", e))?;
        if changed == 0 {
            return Err(not_found("system", id));
        }
        debug!(id, "deleted system");
        Ok(())
    }

    // -- tasks --------------------------------------------------------------

    /// Create a task in the `pending` state.
    pub fn insert_task(&self, new: &NewTask) -> Result<IntegrationTask, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tasks (id, name, description, system_a_id, system_b_id, direction, status,
             schedule_enabled, schedule_interval, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?9)",
            params![
                id,
                new.name,
                new.description,
                new.system_a_id,
                new.system_b_id,
                new.direction.as_str(),
                new.schedule_enabled,
                new.schedule_interval,
                now
            ],
        )
        .map_err(|e| constraint_error("task", e))?;
        debug!(id = %id, name = %new.name, direction = %new.direction, "inserted task");
        fetch_task(&conn, &id)
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &str) -> Result<IntegrationTask, DatabaseError> {
        let conn = self.conn();
        fetch_task(&conn, id)
    }

    /// List all tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<IntegrationTask>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Move a task into `running` unless it already is.
    ///
    /// The check and the transition are one conditional `UPDATE`, so two
    /// concurrent callers can never both claim the same task.
    pub fn claim_task(&self, id: &str) -> Result<TaskClaim, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'running', updated_at = ?1
             WHERE id = ?2 AND status != 'running'",
            params![now, id],
        )?;
        if changed == 1 {
            debug!(id, "claimed task");
            return Ok(TaskClaim::Claimed(fetch_task(&conn, id)?));
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM tasks WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(TaskClaim::AlreadyRunning)
        } else {
            Err(not_found("task", id))
        }
    }

    /// Mark a run as successful and stamp `last_run`.
    pub fn complete_task(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.set_task_status(id, TaskStatus::Completed, Some(&now), &now)
    }

    /// Mark a run as failed. `last_run` is left untouched.
    pub fn fail_task(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.set_task_status(id, TaskStatus::Failed, None, &now)
    }

    fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        last_run: Option<&str>,
        now: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tasks SET status = ?1, last_run = COALESCE(?2, last_run), updated_at = ?3
             WHERE id = ?4",
            params![status.as_str(), last_run, now, id],
        )?;
        if changed == 0 {
            return Err(not_found("task", id));
        }
        debug!(id, status = %status, "task status updated");
        Ok(())
    }

    /// Tasks the periodic scan may start: scheduling on, not running.
    pub fn list_schedulable_tasks(&self) -> Result<Vec<IntegrationTask>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE schedule_enabled = 1 AND status IN ('pending', 'completed', 'failed')
             ORDER BY rowid"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Fail tasks left `running` by a process that died mid-run.
    pub fn fail_stale_running_tasks(&self) -> Result<usize, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'failed', updated_at = ?1 WHERE status = 'running'",
            params![now],
        )?;
        if changed > 0 {
            warn!(count = changed, "reset tasks left running by a previous process");
        }
        Ok(changed)
    }

    /// Delete a task together with its mappings and events, unless it is
    /// running. The status check and the deletes share one transaction, so
    /// a concurrent claim either sees no task or blocks the delete.
    pub fn delete_task(&self, id: &str) -> Result<TaskDeletion, DatabaseError> {
        self.transaction(|conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM tasks WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            match status.as_deref() {
                None => return Err(not_found("task", id)),
                Some("running") => return Ok(TaskDeletion::Running),
                Some(_) => {}
            }

            let mappings = conn.execute("DELETE FROM mappings WHERE task_id = ?1", params![id])?;
            let events = conn.execute("DELETE FROM events WHERE task_id = ?1", params![id])?;
            conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND status != 'running'",
                params![id],
            )?;
            debug!(id, mappings, events, "deleted task");
            Ok(TaskDeletion::Deleted)
        })
    }

    // -- mappings -----------------------------------------------------------

    /// Add a field mapping to a task.
    pub fn insert_mapping(
        &self,
        task_id: &str,
        new: &NewMapping,
    ) -> Result<DataMapping, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let rule = new
            .transformation_rule
            .as_ref()
            .map(|r| r.to_value().to_string());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO mappings (id, task_id, field_a, field_b, transformation_rule, is_required,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![id, task_id, new.field_a, new.field_b, rule, new.is_required, now],
        )
        .map_err(|e| constraint_error("mapping", e))?;
        debug!(id = %id, task_id, field_a = %new.field_a, field_b = %new.field_b, "inserted mapping");

        let mapping = conn
            .query_row(
                &format!("SELECT {MAPPING_COLUMNS} FROM mappings WHERE id = ?1"),
                params![id],
                mapping_from_row,
            )?;
        Ok(mapping)
    }

    /// A task's mappings in creation order.
    pub fn list_mappings(&self, task_id: &str) -> Result<Vec<DataMapping>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MAPPING_COLUMNS} FROM mappings WHERE task_id = ?1 ORDER BY rowid"
        ))?;
        let mappings = stmt
            .query_map(params![task_id], mapping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Remove one mapping from a task.
    pub fn delete_mapping(&self, task_id: &str, mapping_id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM mappings WHERE id = ?1 AND task_id = ?2",
            params![mapping_id, task_id],
        )?;
        if changed == 0 {
            return Err(not_found("mapping", mapping_id));
        }
        debug!(mapping_id, task_id, "deleted mapping");
        Ok(())
    }

    // -- events -------------------------------------------------------------

    /// Append an event to the log.
    pub fn insert_event(&self, event: &NewEvent) -> Result<IntegrationEvent, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let details = event.error_details.as_ref().map(|d| d.to_string());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO events (task_id, event_type, message, error_details, records_synced,
             sync_duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.task_id,
                event.event_type.as_str(),
                event.message,
                details,
                event.records_synced,
                event.sync_duration,
                now
            ],
        )
        .map_err(|e| constraint_error("event", e))?;
        let id = conn.last_insert_rowid();
        debug!(id, task_id = %event.task_id, event_type = %event.event_type, "inserted event");

        let stored = conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![id],
            event_from_row,
        )?;
        Ok(stored)
    }

    /// Events of one task, newest first, one page at a time.
    pub fn list_task_events(
        &self,
        task_id: &str,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<IntegrationEvent>, DatabaseError> {
        let conn = self.conn();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;

        let per_page = pagination.per_page.max(1);
        let total_pages = ((total as u64).saturating_add(per_page as u64 - 1)) / per_page as u64;
        let offset = ((pagination.page.max(1) - 1) as i64) * per_page as i64;

        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE task_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let items = stmt
            .query_map(params![task_id, per_page as i64, offset], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaginatedResult {
            items,
            total: total as u64,
            page: pagination.page.max(1),
            per_page,
            total_pages: total_pages as u32,
        })
    }

    /// Browse the whole event log, newest first, optionally filtered.
    pub fn list_events(
        &self,
        filter: &EventFilter,
        limit: u32,
    ) -> Result<Vec<IntegrationEvent>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(task_id) = &filter.task_id {
            bound.push(Box::new(task_id.clone()));
            clauses.push(format!("task_id = ?{}", bound.len()));
        }
        if let Some(event_type) = filter.event_type {
            bound.push(Box::new(event_type.as_str()));
            clauses.push(format!("event_type = ?{}", bound.len()));
        }
        bound.push(Box::new(limit));
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {where_sql} ORDER BY id DESC LIMIT ?{}",
            bound.len()
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        let events = stmt
            .query_map(param_refs.as_slice(), event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Task counts by status, event total, and the latest error events.
    pub fn dashboard_summary(&self) -> Result<DashboardSummary, DatabaseError> {
        let recent_errors = self.list_events(
            &EventFilter {
                task_id: None,
                event_type: Some(crate::models::EventType::Error),
            },
            RECENT_ERROR_LIMIT,
        )?;

        let conn = self.conn();
        let mut summary = DashboardSummary {
            total_tasks: 0,
            pending_tasks: 0,
            running_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            total_events: 0,
            recent_errors,
        };

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, count) in rows {
            summary.total_tasks += count;
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => summary.pending_tasks = count,
                Ok(TaskStatus::Running) => summary.running_tasks = count,
                Ok(TaskStatus::Completed) => summary.completed_tasks = count,
                Ok(TaskStatus::Failed) => summary.failed_tasks = count,
                Err(e) => warn!(error = %e, "unexpected task status in database"),
            }
        }

        summary.total_events = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn fetch_system(conn: &Connection, id: &str) -> Result<ExternalSystem, DatabaseError> {
    conn.query_row(
        &format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE id = ?1"),
        params![id],
        system_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => not_found("system", id),
        other => other.into(),
    })
}

fn fetch_task(conn: &Connection, id: &str) -> Result<IntegrationTask, DatabaseError> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id],
        task_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => not_found("task", id),
        other => other.into(),
    })
}

fn system_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalSystem> {
    Ok(ExternalSystem {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        api_endpoint: row.get(3)?,
        api_key: row.get(4)?,
        is_active: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<IntegrationTask> {
    let last_run: Option<String> = row.get(11)?;
    Ok(IntegrationTask {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        system_a_id: row.get(3)?,
        system_b_id: row.get(4)?,
        direction: parse_column(5, row.get(5)?)?,
        status: parse_column(6, row.get(6)?)?,
        schedule_enabled: row.get(7)?,
        schedule_interval: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
        last_run: last_run.as_deref().map(parse_datetime),
    })
}

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<DataMapping> {
    let id: String = row.get(0)?;
    let raw_rule: Option<String> = row.get(4)?;
    let transformation_rule = raw_rule.and_then(|raw| match TransformRule::parse(&raw) {
        Ok(rule) => Some(rule),
        Err(e) => {
            warn!(mapping_id = %id, error = %e, "stored transformation rule is malformed, ignoring");
            None
        }
    });
    Ok(DataMapping {
        id,
        task_id: row.get(1)?,
        field_a: row.get(2)?,
        field_b: row.get(3)?,
        transformation_rule,
        is_required: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<IntegrationEvent> {
    let raw_details: Option<String> = row.get(4)?;
    let error_details = raw_details.map(|raw| {
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
    });
    Ok(IntegrationEvent {
        id: row.get(0)?,
        task_id: row.get(1)?,
        event_type: parse_column(2, row.get(2)?)?,
        message: row.get(3)?,
        error_details,
        records_synced: row.get(5)?,
        sync_duration: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Decode a text column into one of the string-backed model enums.
fn parse_column<T: FromStr<Err = String>>(idx: usize, raw: String) -> rusqlite::Result<T> {
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn not_found(entity: &str, id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.into(),
        id: id.to_string(),
    }
}

/// Turn SQLite constraint violations into [`DatabaseError::Constraint`].
fn constraint_error(entity: &str, err: rusqlite::Error) -> DatabaseError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            DatabaseError::Constraint {
                entity: entity.into(),
                detail: msg.unwrap_or_else(|| e.to_string()),
            }
        }
        other => other.into(),
    }
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, EventType};
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn new_system(name: &str) -> NewSystem {
        NewSystem {
            name: name.into(),
            description: String::new(),
            api_endpoint: format!("https://{name}.example.com"),
            api_key: "k".into(),
            is_active: true,
        }
    }

    fn seed_task(db: &Database) -> IntegrationTask {
        let a = db.insert_system(&new_system("crm")).unwrap();
        let b = db.insert_system(&new_system("erp")).unwrap();
        db.insert_task(&NewTask {
            name: "contacts".into(),
            description: String::new(),
            system_a_id: a.id,
            system_b_id: b.id,
            direction: Direction::AToB,
            schedule_enabled: true,
            schedule_interval: None,
        })
        .unwrap()
    }

    #[test]
    fn test_system_crud_and_upsert() {
        let db = setup_db();
        let sys = db.insert_system(&new_system("crm")).unwrap();
        assert_eq!(db.get_system(&sys.id).unwrap().name, "crm");
        assert!(db.find_system_by_name("crm").unwrap().is_some());

        let mut update = new_system("crm");
        update.api_key = "rotated".into();
        update.is_active = false;
        let upserted = db.upsert_system(&update).unwrap();
        assert_eq!(upserted.id, sys.id);
        assert_eq!(upserted.api_key, "rotated");
        assert!(!upserted.is_active);
        assert_eq!(db.list_systems().unwrap().len(), 1);

        let dup = db.insert_system(&new_system("crm"));
        assert!(matches!(dup, Err(DatabaseError::Constraint { .. })));

        db.delete_system(&sys.id).unwrap();
        assert!(matches!(db.get_system(&sys.id), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_delete_referenced_system_is_rejected() {
        let db = setup_db();
        let task = seed_task(&db);
        let result = db.delete_system(&task.system_a_id);
        assert!(matches!(result, Err(DatabaseError::Constraint { .. })));
    }

    #[test]
    fn test_task_with_unknown_system_is_rejected() {
        let db = setup_db();
        let result = db.insert_task(&NewTask {
            name: "orphan".into(),
            description: String::new(),
            system_a_id: "nope".into(),
            system_b_id: "nope".into(),
            direction: Direction::BToA,
            schedule_enabled: false,
            schedule_interval: None,
        });
        assert!(matches!(result, Err(DatabaseError::Constraint { .. })));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = setup_db();
        let task = seed_task(&db);
        assert_eq!(task.status, TaskStatus::Pending);

        let first = db.claim_task(&task.id).unwrap();
        assert!(matches!(first, TaskClaim::Claimed(ref t) if t.status == TaskStatus::Running));
        assert!(matches!(db.claim_task(&task.id).unwrap(), TaskClaim::AlreadyRunning));
        assert!(matches!(db.claim_task("missing"), Err(DatabaseError::NotFound { .. })));

        db.fail_task(&task.id).unwrap();
        assert!(matches!(db.claim_task(&task.id).unwrap(), TaskClaim::Claimed(_)));
    }

    #[test]
    fn test_complete_stamps_last_run_and_fail_does_not() {
        let db = setup_db();
        let task = seed_task(&db);
        db.claim_task(&task.id).unwrap();
        db.fail_task(&task.id).unwrap();
        let failed = db.get_task(&task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.last_run.is_none());

        db.claim_task(&task.id).unwrap();
        db.complete_task(&task.id).unwrap();
        let done = db.get_task(&task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.last_run.is_some());
    }

    #[test]
    fn test_schedulable_tasks_skip_running_and_disabled() {
        let db = setup_db();
        let task = seed_task(&db);
        assert_eq!(db.list_schedulable_tasks().unwrap().len(), 1);

        db.claim_task(&task.id).unwrap();
        assert!(db.list_schedulable_tasks().unwrap().is_empty());

        assert_eq!(db.fail_stale_running_tasks().unwrap(), 1);
        assert_eq!(db.get_task(&task.id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_mappings_keep_creation_order_and_uniqueness() {
        let db = setup_db();
        let task = seed_task(&db);
        for (a, b) in [("zeta", "z"), ("alpha", "a"), ("mid", "m")] {
            db.insert_mapping(
                &task.id,
                &NewMapping {
                    field_a: a.into(),
                    field_b: b.into(),
                    transformation_rule: Some(TransformRule::Uppercase),
                    is_required: true,
                },
            )
            .unwrap();
        }
        let fields: Vec<String> = db
            .list_mappings(&task.id)
            .unwrap()
            .into_iter()
            .map(|m| m.field_a)
            .collect();
        assert_eq!(fields, vec!["zeta", "alpha", "mid"]);

        let dup = db.insert_mapping(
            &task.id,
            &NewMapping {
                field_a: "zeta".into(),
                field_b: "z".into(),
                transformation_rule: None,
                is_required: false,
            },
        );
        assert!(matches!(dup, Err(DatabaseError::Constraint { .. })));
    }

    #[test]
    fn test_malformed_stored_rule_is_ignored() {
        let db = setup_db();
        let task = seed_task(&db);
        db.conn()
            .execute(
                "INSERT INTO mappings (id, task_id, field_a, field_b, transformation_rule, is_required, created_at, updated_at)
                 VALUES ('m1', ?1, 'a', 'b', 'not json', 1, '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
                params![task.id],
            )
            .unwrap();
        let mappings = db.list_mappings(&task.id).unwrap();
        assert!(mappings[0].transformation_rule.is_none());
    }

    #[test]
    fn test_events_newest_first_and_paginated() {
        let db = setup_db();
        let task = seed_task(&db);
        db.insert_event(&NewEvent::sync_start(&task.id, 0)).unwrap();
        db.insert_event(&NewEvent::error(&task.id, "boom".into(), json!({"kind": "x"})))
            .unwrap();
        db.insert_event(&NewEvent::sync_start(&task.id, 1)).unwrap();

        let page = db
            .list_task_events(&task.id, &Pagination { page: 1, per_page: 2 })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items[0].message, "sync started (retry 1)");
        assert_eq!(page.items[1].event_type, EventType::Error);
        assert_eq!(page.items[1].error_details, Some(json!({"kind": "x"})));

        let errors = db
            .list_events(
                &EventFilter {
                    task_id: Some(task.id.clone()),
                    event_type: Some(EventType::Error),
                },
                50,
            )
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(db.list_events(&EventFilter::default(), 50).unwrap().len(), 3);
    }

    #[test]
    fn test_dashboard_summary() {
        let db = setup_db();
        let task = seed_task(&db);
        for i in 0..12 {
            db.insert_event(&NewEvent::error(&task.id, format!("failure {i}"), json!({})))
                .unwrap();
        }
        db.claim_task(&task.id).unwrap();

        let summary = db.dashboard_summary().unwrap();
        assert_eq!(summary.total_tasks, 1);
        assert_eq!(summary.running_tasks, 1);
        assert_eq!(summary.pending_tasks, 0);
        assert_eq!(summary.total_events, 12);
        assert_eq!(summary.recent_errors.len(), RECENT_ERROR_LIMIT as usize);
        assert_eq!(summary.recent_errors[0].message, "failure 11");
    }

    #[test]
    fn test_delete_task_cascades() {
        let db = setup_db();
        let task = seed_task(&db);
        db.insert_mapping(
            &task.id,
            &NewMapping {
                field_a: "a".into(),
                field_b: "b".into(),
                transformation_rule: None,
                is_required: true,
            },
        )
        .unwrap();
        db.insert_event(&NewEvent::sync_start(&task.id, 0)).unwrap();

        assert_eq!(db.delete_task(&task.id).unwrap(), TaskDeletion::Deleted);
        assert!(matches!(db.get_task(&task.id), Err(DatabaseError::NotFound { .. })));
        assert!(db.list_mappings(&task.id).unwrap().is_empty());
        assert_eq!(db.list_events(&EventFilter::default(), 10).unwrap().len(), 0);
        assert!(matches!(db.delete_task(&task.id), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_claimed_task_cannot_be_deleted() {
        let db = setup_db();
        let task = seed_task(&db);
        db.insert_event(&NewEvent::sync_start(&task.id, 0)).unwrap();
        db.claim_task(&task.id).unwrap();

        assert_eq!(db.delete_task(&task.id).unwrap(), TaskDeletion::Running);
        assert_eq!(db.get_task(&task.id).unwrap().status, TaskStatus::Running);
        assert_eq!(db.list_task_events(&task.id, &Pagination::default()).unwrap().total, 1);

        db.complete_task(&task.id).unwrap();
        assert_eq!(db.delete_task(&task.id).unwrap(), TaskDeletion::Deleted);
    }
}
