//! Sync orchestration for one integration task run.
//!
//! The [`SyncEngine`] drives the fetch → map → push pipeline for the legs a
//! task's direction calls for:
//!
//! 1. `a_to_b`: fetch from system A, map, push into system B.
//! 2. `b_to_a`: fetch from system B, map, push into system A.
//! 3. `bidirectional`: both legs, A→B first, with the same mapping set.
//!
//! The first failure aborts the remaining steps. A leg that already pushed is
//! not rolled back. Status, events and retries are the task runner's job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connector::SystemConnector;
use crate::db::Database;
use crate::errors::{DatabaseError, SyncError};
use crate::mapper;
use crate::models::{DataMapping, ExternalSystem, IntegrationTask};

/// Everything a run needs, loaded before the first network call.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub task: IntegrationTask,
    pub system_a: ExternalSystem,
    pub system_b: ExternalSystem,
    pub mappings: Vec<DataMapping>,
}

impl TaskPlan {
    /// Load the task's systems and mappings from the database.
    pub fn load(db: &Database, task: IntegrationTask) -> Result<Self, DatabaseError> {
        let system_a = db.get_system(&task.system_a_id)?;
        let system_b = db.get_system(&task.system_b_id)?;
        let mappings = db.list_mappings(&task.id)?;
        Ok(Self {
            task,
            system_a,
            system_b,
            mappings,
        })
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    /// Records accepted by target systems across all legs.
    pub records_synced: u64,
    /// Non-fatal problems. Always empty today; kept for the result contract.
    pub errors: Vec<String>,
}

/// Runs the fetch → map → push pipeline over a [`SystemConnector`].
#[derive(Clone)]
pub struct SyncEngine {
    connector: Arc<dyn SystemConnector>,
}

impl SyncEngine {
    pub fn new(connector: Arc<dyn SystemConnector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<dyn SystemConnector> {
        &self.connector
    }

    /// Execute one run of `plan`.
    pub async fn run(&self, plan: &TaskPlan) -> Result<SyncOutcome, SyncError> {
        let task = &plan.task;
        for system in [&plan.system_a, &plan.system_b] {
            if !system.is_active {
                return Err(SyncError::SystemInactive {
                    name: system.name.clone(),
                });
            }
        }

        info!(
            task_id = %task.id,
            task = %task.name,
            direction = %task.direction,
            mappings = plan.mappings.len(),
            "starting sync"
        );

        let mut outcome = SyncOutcome::default();
        if task.direction.includes_a_to_b() {
            outcome.records_synced += self
                .sync_leg(&plan.system_a, &plan.system_b, &plan.mappings)
                .await? as u64;
        }
        if task.direction.includes_b_to_a() {
            outcome.records_synced += self
                .sync_leg(&plan.system_b, &plan.system_a, &plan.mappings)
                .await? as u64;
        }

        info!(task_id = %task.id, records_synced = outcome.records_synced, "sync finished");
        Ok(outcome)
    }

    async fn sync_leg(
        &self,
        source: &ExternalSystem,
        target: &ExternalSystem,
        mappings: &[DataMapping],
    ) -> Result<usize, SyncError> {
        let raw = self.connector.fetch(source).await?;
        debug!(source = %source.name, records = raw.len(), "fetched source batch");

        let mapped = mapper::map_batch(&raw, mappings)?;

        let pushed = self.connector.push(target, &mapped).await?;
        debug!(source = %source.name, target = %target.name, pushed, "leg complete");
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::FakeConnector;
    use crate::errors::MappingError;
    use crate::models::{Batch, Direction, TaskStatus};
    use crate::transform::TransformRule;
    use chrono::Utc;
    use serde_json::json;

    fn system(name: &str) -> ExternalSystem {
        ExternalSystem {
            id: format!("{name}-id"),
            name: name.into(),
            description: String::new(),
            api_endpoint: format!("https://{name}.example.com"),
            api_key: "k".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn plan(direction: Direction, mappings: Vec<DataMapping>) -> TaskPlan {
        TaskPlan {
            task: IntegrationTask {
                id: "task-1".into(),
                name: "contacts".into(),
                description: String::new(),
                system_a_id: "a-id".into(),
                system_b_id: "b-id".into(),
                direction,
                status: TaskStatus::Running,
                schedule_enabled: false,
                schedule_interval: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_run: None,
            },
            system_a: system("a"),
            system_b: system("b"),
            mappings,
        }
    }

    fn mapping(field_a: &str, field_b: &str, rule: Option<TransformRule>, required: bool) -> DataMapping {
        DataMapping {
            id: field_a.into(),
            task_id: "task-1".into(),
            field_a: field_a.into(),
            field_b: field_b.into(),
            transformation_rule: rule,
            is_required: required,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_a_to_b_maps_and_pushes() {
        let connector = Arc::new(FakeConnector::default().with_batch("a", json!([{"name": "x"}])));
        let engine = SyncEngine::new(connector.clone());
        let plan = plan(
            Direction::AToB,
            vec![mapping("name", "label", Some(TransformRule::Uppercase), true)],
        );

        let outcome = engine.run(&plan).await.unwrap();
        assert_eq!(outcome.records_synced, 1);
        assert!(outcome.errors.is_empty());

        let pushed = connector.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "b");
        assert_eq!(
            serde_json::to_value(&pushed[0].1).unwrap(),
            json!([{"label": "X"}])
        );
    }

    #[tokio::test]
    async fn test_b_to_a_reverses_source_and_target() {
        let connector = Arc::new(
            FakeConnector::default().with_batch("b", json!([{"n": 1}, {"n": 2}, {"n": 3}])),
        );
        let engine = SyncEngine::new(connector.clone());
        let outcome = engine
            .run(&plan(Direction::BToA, vec![mapping("n", "m", None, true)]))
            .await
            .unwrap();
        assert_eq!(outcome.records_synced, 3);
        assert_eq!(connector.pushed()[0].0, "a");
    }

    #[tokio::test]
    async fn test_bidirectional_runs_both_legs_with_same_mappings() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_batch("a", json!([{"name": "x"}]))
                .with_batch("b", json!({"name": "y"})),
        );
        let engine = SyncEngine::new(connector.clone());
        let outcome = engine
            .run(&plan(
                Direction::Bidirectional,
                vec![mapping("name", "label", None, true)],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.records_synced, 2);
        let pushed = connector.pushed();
        assert_eq!(pushed[0].0, "b");
        assert_eq!(pushed[1].0, "a");
        assert!(matches!(pushed[1].1, Batch::One(ref r) if r.contains_key("label")));
    }

    #[tokio::test]
    async fn test_missing_required_field_aborts_before_push() {
        let connector = Arc::new(FakeConnector::default().with_batch("a", json!([{"name": "x"}])));
        let engine = SyncEngine::new(connector.clone());
        let err = engine
            .run(&plan(Direction::AToB, vec![mapping("email", "mail", None, true)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Mapping(MappingError::MissingRequiredField { ref field }) if field == "email"
        ));
        assert!(connector.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_is_connection_error() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_batch("a", json!([{"name": "x"}]))
                .failing_push_to("b"),
        );
        let engine = SyncEngine::new(connector);
        let err = engine
            .run(&plan(Direction::AToB, vec![mapping("name", "label", None, true)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection_error");
    }

    #[tokio::test]
    async fn test_first_leg_is_not_rolled_back_when_second_fails() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_batch("a", json!([{"name": "x"}]))
                .with_batch("b", json!([{"name": "y"}]))
                .failing_push_to("a"),
        );
        let engine = SyncEngine::new(connector.clone());
        let result = engine
            .run(&plan(
                Direction::Bidirectional,
                vec![mapping("name", "label", None, true)],
            ))
            .await;
        assert!(result.is_err());
        assert_eq!(connector.pushed().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_system_fails_without_network_calls() {
        let connector = Arc::new(FakeConnector::default().with_batch("a", json!([])));
        let engine = SyncEngine::new(connector.clone());
        let mut plan = plan(Direction::AToB, vec![]);
        plan.system_b.is_active = false;

        let err = engine.run(&plan).await.unwrap_err();
        assert!(matches!(err, SyncError::SystemInactive { ref name } if name == "b"));
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_syncs_zero_records() {
        let connector = Arc::new(FakeConnector::default().with_batch("a", json!([])));
        let engine = SyncEngine::new(connector);
        let outcome = engine
            .run(&plan(Direction::AToB, vec![mapping("name", "label", None, true)]))
            .await
            .unwrap();
        assert_eq!(outcome.records_synced, 0);
    }
}
