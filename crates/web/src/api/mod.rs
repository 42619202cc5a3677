//! REST API endpoint modules.

pub mod dashboard;
pub mod events;
pub mod mappings;
pub mod status;
pub mod systems;
pub mod tasks;
