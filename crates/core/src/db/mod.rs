//! SQLite store behind the control plane and the task runner.
//!
//! One [`Database`] holds the registered systems, the integration tasks with
//! their field mappings, and the append-only event log. All access funnels
//! through a single connection lock, so the conditional claim and delete in
//! [`queries`] are atomic with respect to each other and event appends from
//! concurrent workers land in completion order.

pub mod queries;
pub mod schema;

pub use queries::{TaskClaim, TaskDeletion};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Applied to every file-backed connection. Task rows reference systems and
/// events reference tasks, so foreign keys must be on.
const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Shared handle to the integrasync store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the store at `path`, creating the file and its directory on
    /// first start. Call [`initialize`](Self::initialize) before use.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening integrasync store");

        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(FILE_PRAGMAS)?;
        debug!("store opened in WAL mode");
        Ok(Self::wrap(conn))
    }

    /// A throwaway store for tests and dry runs.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Bring the schema to the latest version. Safe to call on every start.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let before = schema::get_schema_version(&conn)?;
        schema::run_migrations(&conn)?;
        info!(from = before, to = schema::latest_version(), "store schema ready");
        Ok(())
    }

    /// Lock the connection. A worker that panicked while holding the lock
    /// does not take the store down with it.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in a transaction holding the lock throughout. An `Err` from
    /// `f` rolls everything back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_system(conn: &Connection, id: &str, name: &str) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO systems (id, name, api_endpoint, api_key, created_at, updated_at)
             VALUES (?1, ?2, 'https://lms.example.test', 'k', ?3, ?3)",
            rusqlite::params![id, name, "2025-01-01T00:00:00Z"],
        )?;
        Ok(())
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("integrasync.db");

        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        insert_system(&db.conn(), "s1", "lms").unwrap();
        drop(db);

        let reopened = Database::new(&path).unwrap();
        reopened.initialize().unwrap();
        assert_eq!(count(&reopened, "systems"), 1);
        assert_eq!(
            schema::get_schema_version(&reopened.conn()).unwrap(),
            schema::latest_version()
        );
    }

    #[test]
    fn test_task_rows_require_existing_systems() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result = db.conn().execute(
            "INSERT INTO tasks (id, name, system_a_id, system_b_id, direction, status,
             created_at, updated_at)
             VALUES ('t1', 'sync', 'ghost-a', 'ghost-b', 'a_to_b', 'pending', ?1, ?1)",
            ["2025-01-01T00:00:00Z"],
        );
        assert!(result.is_err());
        assert_eq!(count(&db, "tasks"), 0);
    }

    #[test]
    fn test_failed_transaction_leaves_no_partial_rows() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        // The second insert violates the unique system name.
        let result = db.transaction(|conn| {
            insert_system(conn, "s1", "crm")?;
            insert_system(conn, "s2", "crm")
        });
        assert!(result.is_err());
        assert_eq!(count(&db, "systems"), 0);

        db.transaction(|conn| {
            insert_system(conn, "s1", "crm")?;
            insert_system(conn, "s2", "lms")
        })
        .unwrap();
        assert_eq!(count(&db, "systems"), 2);
    }
}
