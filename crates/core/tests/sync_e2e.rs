//! End-to-end tests for integration task runs.
//!
//! These tests exercise the real `TaskRunner` with:
//! - The real `HttpConnector` against local `mockito` servers
//! - Real SQLite databases in a temp directory
//!
//! No external network I/O: every system is a mock server on localhost.

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tempfile::TempDir;

use integrasync_core::config::ConnectorConfig;
use integrasync_core::control::{ControlPlane, MappingRequest};
use integrasync_core::db::Database;
use integrasync_core::models::{
    Direction, EventType, IntegrationEvent, IntegrationTask, NewSystem, NewTask, Pagination,
    TaskStatus,
};
use integrasync_core::runner::{RetryPolicy, RunOutcome, TaskRunner};
use integrasync_core::{HttpConnector, SyncEngine};

// ===========================================================================
// Helpers
// ===========================================================================

struct Env {
    _dir: TempDir,
    control: ControlPlane,
    server_a: ServerGuard,
    server_b: ServerGuard,
}

async fn env() -> Env {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::new(dir.path().join("integrasync.db")).unwrap());
    db.initialize().unwrap();

    let connector = HttpConnector::new(&ConnectorConfig::default()).unwrap();
    let runner = TaskRunner::new(
        db,
        SyncEngine::new(Arc::new(connector)),
        RetryPolicy::default(),
        16,
    );

    Env {
        _dir: dir,
        control: ControlPlane::new(runner),
        server_a: Server::new_async().await,
        server_b: Server::new_async().await,
    }
}

fn create_task(env: &Env, direction: Direction, system_b_active: bool) -> IntegrationTask {
    let a = env
        .control
        .create_system(NewSystem {
            name: "lms".into(),
            description: "learning platform".into(),
            api_endpoint: env.server_a.url(),
            api_key: "key-a".into(),
            is_active: true,
        })
        .unwrap();
    let b = env
        .control
        .create_system(NewSystem {
            name: "crm".into(),
            description: String::new(),
            api_endpoint: env.server_b.url(),
            api_key: "key-b".into(),
            is_active: system_b_active,
        })
        .unwrap();
    env.control
        .create_task(NewTask {
            name: "students".into(),
            description: String::new(),
            system_a_id: a.id,
            system_b_id: b.id,
            direction,
            schedule_enabled: false,
            schedule_interval: None,
        })
        .unwrap()
}

fn add_mapping(env: &Env, task: &IntegrationTask, mapping: serde_json::Value) {
    let request: MappingRequest = serde_json::from_value(mapping).unwrap();
    env.control.add_mapping(&task.id, request).unwrap();
}

/// Events of a task, oldest first.
fn events(env: &Env, task: &IntegrationTask) -> Vec<IntegrationEvent> {
    let mut items = env
        .control
        .task_events(&task.id, &Pagination { page: 1, per_page: 100 })
        .unwrap()
        .items;
    items.reverse();
    items
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_a_to_b_run_transforms_and_pushes() {
    let mut env = env().await;
    let task = create_task(&env, Direction::AToB, true);
    add_mapping(
        &env,
        &task,
        json!({"field_a": "name", "field_b": "label", "transformation_rule": {"type": "uppercase"}}),
    );
    add_mapping(
        &env,
        &task,
        json!({"field_a": "enrolled", "field_b": "since",
               "transformation_rule": {"type": "format_date", "format": "%d/%m/%Y"},
               "is_required": false}),
    );

    let fetch = env
        .server_a
        .mock("GET", "/data")
        .match_header("authorization", "Bearer key-a")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"name": "x", "enrolled": "2024-03-15T10:30:00Z", "ignored": 1}, {"name": "y"}]"#)
        .create_async()
        .await;
    let push = env
        .server_b
        .mock("POST", "/data")
        .match_header("authorization", "Bearer key-b")
        .match_body(Matcher::Json(json!([
            {"label": "X", "since": "15/03/2024"},
            {"label": "Y"}
        ])))
        .with_status(200)
        .create_async()
        .await;

    let outcome = env.control.runner().run_now(&task.id).await.unwrap();
    match outcome {
        RunOutcome::Completed(result) => assert_eq!(result.records_synced, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    fetch.assert_async().await;
    push.assert_async().await;

    let events = events(&env, &task);
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![EventType::SyncStart, EventType::SyncComplete]);
    assert_eq!(events[1].records_synced, 2);

    let task = env.control.get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.last_run.is_some());
}

#[tokio::test]
async fn test_bidirectional_run_pushes_both_ways() {
    let mut env = env().await;
    let task = create_task(&env, Direction::Bidirectional, true);
    add_mapping(&env, &task, json!({"field_a": "score", "field_b": "points",
                                    "transformation_rule": {"type": "multiply", "factor": 10}}));

    env.server_a
        .mock("GET", "/data")
        .with_status(200)
        .with_body(r#"[{"score": 3}]"#)
        .create_async()
        .await;
    env.server_b
        .mock("GET", "/data")
        .with_status(200)
        .with_body(r#"{"score": 1.5}"#)
        .create_async()
        .await;
    let push_b = env
        .server_b
        .mock("POST", "/data")
        .match_body(Matcher::Json(json!([{"points": 30}])))
        .with_status(200)
        .create_async()
        .await;
    let push_a = env
        .server_a
        .mock("POST", "/data")
        .match_body(Matcher::Json(json!({"points": 15.0})))
        .with_status(200)
        .create_async()
        .await;

    let outcome = env.control.runner().run_now(&task.id).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.records_synced == 2));
    push_b.assert_async().await;
    push_a.assert_async().await;
}

#[tokio::test]
async fn test_missing_required_field_fails_run() {
    let mut env = env().await;
    let task = create_task(&env, Direction::AToB, true);
    add_mapping(&env, &task, json!({"field_a": "email", "field_b": "mail"}));

    env.server_a
        .mock("GET", "/data")
        .with_status(200)
        .with_body(r#"[{"name": "x"}]"#)
        .create_async()
        .await;
    let push = env
        .server_b
        .mock("POST", "/data")
        .expect(0)
        .create_async()
        .await;

    let outcome = env.control.runner().run_now(&task.id).await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Failed { retry_in: Some(d), .. } if d == Duration::from_secs(60)
    ));
    push.assert_async().await;

    let errors: Vec<IntegrationEvent> = events(&env, &task)
        .into_iter()
        .filter(|e| e.event_type == EventType::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("email"));
    assert_eq!(env.control.get_task(&task.id).unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_target_error_status_is_connection_error() {
    let mut env = env().await;
    let task = create_task(&env, Direction::AToB, true);
    add_mapping(&env, &task, json!({"field_a": "name", "field_b": "label"}));

    env.server_a
        .mock("GET", "/data")
        .with_status(200)
        .with_body(r#"[{"name": "x"}]"#)
        .create_async()
        .await;
    env.server_b
        .mock("POST", "/data")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    env.control.runner().run_now(&task.id).await.unwrap();

    let events = events(&env, &task);
    let error = events.last().unwrap();
    assert_eq!(error.event_type, EventType::Error);
    assert!(error.message.contains("502"));
    assert_eq!(
        error.error_details.as_ref().unwrap()["kind"],
        "connection_error"
    );
}

#[tokio::test]
async fn test_inactive_target_fails_before_any_request() {
    let mut env = env().await;
    let task = create_task(&env, Direction::AToB, false);

    let fetch = env
        .server_a
        .mock("GET", "/data")
        .expect(0)
        .create_async()
        .await;

    env.control.runner().run_now(&task.id).await.unwrap();
    fetch.assert_async().await;

    let events = events(&env, &task);
    assert_eq!(
        events.last().unwrap().error_details.as_ref().unwrap()["kind"],
        "system_inactive"
    );
}

#[tokio::test]
async fn test_dashboard_reflects_runs() {
    let mut env = env().await;
    let task = create_task(&env, Direction::AToB, true);
    add_mapping(&env, &task, json!({"field_a": "email", "field_b": "mail"}));
    env.server_a
        .mock("GET", "/data")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    env.server_b
        .mock("POST", "/data")
        .with_status(200)
        .create_async()
        .await;

    env.control.runner().run_now(&task.id).await.unwrap();

    let summary = env.control.dashboard().unwrap();
    assert_eq!(summary.total_tasks, 1);
    assert_eq!(summary.completed_tasks, 1);
    assert_eq!(summary.total_events, 2);
    assert!(summary.recent_errors.is_empty());
}
