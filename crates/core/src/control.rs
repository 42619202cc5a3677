//! Operator control surface shared by the web API and the CLI.
//!
//! Wraps the database and the task runner with input validation, so both
//! front ends reject the same bad requests the same way.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::connector::HealthReport;
use crate::db::{Database, TaskDeletion};
use crate::errors::{CoreError, MappingError, RunnerError};
use crate::models::{
    DashboardSummary, DataMapping, EventFilter, ExternalSystem, IntegrationEvent,
    IntegrationTask, NewMapping, NewSystem, NewTask, PaginatedResult, Pagination,
};
use crate::runner::TaskRunner;
use crate::transform::TransformRule;

/// Largest page the event listings will return.
pub const MAX_EVENT_LIMIT: u32 = 500;

/// Result of probing a system's health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    pub details: Option<HealthReport>,
}

/// Mapping as submitted by an operator, with the rule still raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRequest {
    pub field_a: String,
    pub field_b: String,
    #[serde(default)]
    pub transformation_rule: Option<Value>,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool {
    true
}

impl MappingRequest {
    /// Validate field names and parse the rule.
    pub fn into_new_mapping(self) -> Result<NewMapping, CoreError> {
        if self.field_a.trim().is_empty() {
            return Err(CoreError::invalid("field_a", "must not be empty"));
        }
        if self.field_b.trim().is_empty() {
            return Err(CoreError::invalid("field_b", "must not be empty"));
        }
        let transformation_rule = match self.transformation_rule {
            None | Some(Value::Null) => None,
            Some(raw) => Some(TransformRule::from_value(raw).map_err(|detail| {
                MappingError::InvalidRule {
                    field: self.field_a.clone(),
                    detail,
                }
            })?),
        };
        Ok(NewMapping {
            field_a: self.field_a,
            field_b: self.field_b,
            transformation_rule,
            is_required: self.is_required,
        })
    }
}

/// Operator-facing operations over systems, tasks, mappings and events.
#[derive(Clone)]
pub struct ControlPlane {
    db: Arc<Database>,
    runner: TaskRunner,
}

impl ControlPlane {
    pub fn new(runner: TaskRunner) -> Self {
        Self {
            db: runner.db().clone(),
            runner,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    // -- systems ------------------------------------------------------------

    pub fn list_systems(&self) -> Result<Vec<ExternalSystem>, CoreError> {
        Ok(self.db.list_systems()?)
    }

    pub fn get_system(&self, id: &str) -> Result<ExternalSystem, CoreError> {
        Ok(self.db.get_system(id)?)
    }

    pub fn create_system(&self, new: NewSystem) -> Result<ExternalSystem, CoreError> {
        validate_system(&new)?;
        let system = self.db.insert_system(&new)?;
        info!(id = %system.id, name = %system.name, "system registered");
        Ok(system)
    }

    pub fn update_system(&self, id: &str, update: NewSystem) -> Result<ExternalSystem, CoreError> {
        validate_system(&update)?;
        Ok(self.db.update_system(id, &update)?)
    }

    pub fn delete_system(&self, id: &str) -> Result<(), CoreError> {
        self.db.delete_system(id)?;
        info!(id, "system deleted");
        Ok(())
    }

    /// Call a system's `/health` endpoint.
    ///
    /// A failed check is reported in the result, not as an error; only an
    /// unknown system is an error.
    pub async fn test_connection(&self, id: &str) -> Result<ConnectionTest, CoreError> {
        let system = self.db.get_system(id)?;
        let result = self
            .runner
            .engine()
            .connector()
            .health_check(&system)
            .await;
        Ok(match result {
            Ok(report) if report.is_healthy() => ConnectionTest {
                success: true,
                message: format!("connection to '{}' succeeded", system.name),
                details: Some(report),
            },
            Ok(report) => ConnectionTest {
                success: false,
                message: format!(
                    "'{}' answered the health check with HTTP {}",
                    system.name, report.status_code
                ),
                details: Some(report),
            },
            Err(e) => {
                warn!(system = %system.name, error = %e, "connection test failed");
                ConnectionTest {
                    success: false,
                    message: e.to_string(),
                    details: None,
                }
            }
        })
    }

    // -- tasks --------------------------------------------------------------

    pub fn list_tasks(&self) -> Result<Vec<IntegrationTask>, CoreError> {
        Ok(self.db.list_tasks()?)
    }

    pub fn get_task(&self, id: &str) -> Result<IntegrationTask, CoreError> {
        Ok(self.db.get_task(id)?)
    }

    pub fn create_task(&self, new: NewTask) -> Result<IntegrationTask, CoreError> {
        if new.name.trim().is_empty() {
            return Err(CoreError::invalid("name", "must not be empty"));
        }
        if new.schedule_interval == Some(0) {
            return Err(CoreError::invalid("schedule_interval", "must be at least one minute"));
        }
        // Surface unknown systems as not-found rather than a constraint error.
        self.db.get_system(&new.system_a_id)?;
        self.db.get_system(&new.system_b_id)?;

        let task = self.db.insert_task(&new)?;
        info!(id = %task.id, name = %task.name, direction = %task.direction, "task created");
        Ok(task)
    }

    /// Delete a task with its mappings and events. Refused while it runs.
    pub fn delete_task(&self, id: &str) -> Result<(), CoreError> {
        match self.db.delete_task(id)? {
            TaskDeletion::Deleted => {
                info!(id, "task deleted");
                Ok(())
            }
            TaskDeletion::Running => Err(RunnerError::ConcurrentRunConflict {
                task_id: id.to_string(),
            }
            .into()),
        }
    }

    /// Queue a run of the task.
    pub async fn trigger_run(&self, id: &str) -> Result<IntegrationTask, CoreError> {
        Ok(self.runner.submit(id).await?)
    }

    // -- mappings -----------------------------------------------------------

    pub fn list_mappings(&self, task_id: &str) -> Result<Vec<DataMapping>, CoreError> {
        self.db.get_task(task_id)?;
        Ok(self.db.list_mappings(task_id)?)
    }

    pub fn add_mapping(&self, task_id: &str, request: MappingRequest) -> Result<DataMapping, CoreError> {
        let new = request.into_new_mapping()?;
        self.db.get_task(task_id)?;
        let mapping = self.db.insert_mapping(task_id, &new)?;
        info!(task_id, field_a = %mapping.field_a, field_b = %mapping.field_b, "mapping added");
        Ok(mapping)
    }

    pub fn delete_mapping(&self, task_id: &str, mapping_id: &str) -> Result<(), CoreError> {
        Ok(self.db.delete_mapping(task_id, mapping_id)?)
    }

    // -- events & dashboard -------------------------------------------------

    /// A task's events, newest first.
    pub fn task_events(
        &self,
        task_id: &str,
        pagination: &Pagination,
    ) -> Result<PaginatedResult<IntegrationEvent>, CoreError> {
        self.db.get_task(task_id)?;
        let pagination = Pagination {
            page: pagination.page.max(1),
            per_page: pagination.per_page.clamp(1, MAX_EVENT_LIMIT),
        };
        Ok(self.db.list_task_events(task_id, &pagination)?)
    }

    /// The global event log, newest first, optionally filtered.
    pub fn events(&self, filter: &EventFilter, limit: u32) -> Result<Vec<IntegrationEvent>, CoreError> {
        Ok(self.db.list_events(filter, limit.clamp(1, MAX_EVENT_LIMIT))?)
    }

    pub fn dashboard(&self) -> Result<DashboardSummary, CoreError> {
        Ok(self.db.dashboard_summary()?)
    }
}

fn validate_system(system: &NewSystem) -> Result<(), CoreError> {
    if system.name.trim().is_empty() {
        return Err(CoreError::invalid("name", "must not be empty"));
    }
    if !(system.api_endpoint.starts_with("http://") || system.api_endpoint.starts_with("https://")) {
        return Err(CoreError::invalid("api_endpoint", "must be an http(s) URL"));
    }
    if system.api_key.is_empty() {
        return Err(CoreError::invalid("api_key", "must not be empty"));
    }
    Ok(())
}
