//! integrasync core library.
//!
//! This crate provides the foundational components for synchronizing records
//! between two external HTTP systems: configuration, database persistence,
//! the transformation engine, the record mapper, system connectors, the sync
//! orchestrator, and the background task runner.

pub mod config;
pub mod connector;
pub mod control;
pub mod db;
pub mod errors;
pub mod mapper;
pub mod models;
pub mod runner;
pub mod sync_engine;
pub mod transform;

// Re-exports for convenience.
pub use config::AppConfig;
pub use connector::{HttpConnector, SystemConnector};
pub use control::ControlPlane;
pub use db::Database;
pub use runner::TaskRunner;
pub use sync_engine::SyncEngine;
