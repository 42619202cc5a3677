//! Terminal styling helpers.

use comfy_table::{Cell, Color};
use console::Style;

use integrasync_core::models::{EventType, TaskStatus};

pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    format!("{} {}", Style::new().yellow().apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Colored table cell for a task status.
pub fn status_cell(status: TaskStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        TaskStatus::Completed => cell.fg(Color::Green),
        TaskStatus::Failed => cell.fg(Color::Red),
        TaskStatus::Running => cell.fg(Color::Cyan),
        TaskStatus::Pending => cell.fg(Color::Yellow),
    }
}

/// Colored table cell for an event type.
pub fn event_cell(event_type: EventType) -> Cell {
    let cell = Cell::new(event_type.as_str());
    match event_type {
        EventType::SyncComplete => cell.fg(Color::Green),
        EventType::Error => cell.fg(Color::Red),
        EventType::DataMismatch => cell.fg(Color::Yellow),
        EventType::SyncStart => cell,
    }
}
