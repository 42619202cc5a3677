//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS systems (
            id            TEXT PRIMARY KEY,
            name          TEXT    NOT NULL UNIQUE,
            description   TEXT    NOT NULL DEFAULT '',
            api_endpoint  TEXT    NOT NULL,
            api_key       TEXT    NOT NULL,
            is_active     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id                 TEXT PRIMARY KEY,
            name               TEXT    NOT NULL,
            description        TEXT    NOT NULL DEFAULT '',
            system_a_id        TEXT    NOT NULL REFERENCES systems (id),
            system_b_id        TEXT    NOT NULL REFERENCES systems (id),
            direction          TEXT    NOT NULL
                CHECK (direction IN ('a_to_b', 'b_to_a', 'bidirectional')),
            status             TEXT    NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            schedule_enabled   INTEGER NOT NULL DEFAULT 0,
            schedule_interval  INTEGER,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            last_run           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);

        CREATE TABLE IF NOT EXISTS mappings (
            id                   TEXT PRIMARY KEY,
            task_id              TEXT    NOT NULL REFERENCES tasks (id),
            field_a              TEXT    NOT NULL,
            field_b              TEXT    NOT NULL,
            transformation_rule  TEXT,
            is_required          INTEGER NOT NULL DEFAULT 1,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL,
            UNIQUE (task_id, field_a, field_b)
        );

        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id         TEXT    NOT NULL REFERENCES tasks (id),
            event_type      TEXT    NOT NULL
                CHECK (event_type IN ('sync_start', 'sync_complete', 'error', 'data_mismatch')),
            message         TEXT    NOT NULL,
            error_details   TEXT,
            records_synced  INTEGER NOT NULL DEFAULT 0,
            sync_duration   REAL,
            created_at      TEXT    NOT NULL,
            CHECK (event_type != 'error' OR length(message) > 0)
        );

        CREATE INDEX IF NOT EXISTS idx_events_task ON events (task_id, id);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events (event_type);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = latest_version(),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Highest migration version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.0).unwrap_or(0)
}

/// Read the current schema version from the SQLite `user_version` pragma.
pub fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
