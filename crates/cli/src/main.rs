//! integrasync command-line management tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! inspecting systems, tasks and the event log, probing system health, and
//! running a task once in the foreground.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use integrasync_core::config::AppConfig;
use integrasync_core::db::Database;
use integrasync_core::models::{EventFilter, EventType, Pagination};
use integrasync_core::runner::{RetryPolicy, RunOutcome, TaskRunner};
use integrasync_core::{ControlPlane, HttpConnector, SyncEngine};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// integrasync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "integrasync",
    version,
    about = "Manage and inspect integrasync integration tasks"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/integrasync/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./integrasync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show task counts and recent errors.
    Status,

    /// Inspect external systems.
    Systems {
        #[command(subcommand)]
        action: SystemsAction,
    },

    /// Inspect integration tasks.
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Run a task once in the foreground, without retries.
    Run {
        /// Task ID.
        task_id: String,
    },

    /// Show recent integration events, newest first.
    Events {
        /// Only events of this task.
        #[arg(long)]
        task: Option<String>,

        /// Only events of this type: sync_start, sync_complete, error, data_mismatch.
        #[arg(long = "type")]
        event_type: Option<String>,

        /// Maximum number of events to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SystemsAction {
    /// List registered systems.
    List,
    /// Check a system's health endpoint.
    Test {
        /// System ID.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum TasksAction {
    /// List all tasks.
    List,
    /// Show a task with its mappings and latest events.
    Show {
        /// Task ID.
        id: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            let config = AppConfig::load_and_validate(&cli.config)
                .context("failed to load configuration")?;
            let control = open_control_plane(&config)?;

            match command {
                Commands::Status => cmd_status(&control),
                Commands::Systems { action } => cmd_systems(&control, action).await,
                Commands::Tasks { action } => cmd_tasks(&control, action),
                Commands::Run { task_id } => cmd_run(&control, &task_id).await,
                Commands::Events {
                    task,
                    event_type,
                    limit,
                } => cmd_events(&control, task, event_type, limit),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// Open the daemon's database and wrap it in a control plane whose runner
/// never retries, since the CLI exits right after a run.
fn open_control_plane(config: &AppConfig) -> Result<ControlPlane> {
    let db = Database::new(config.daemon.db_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    let connector =
        HttpConnector::new(&config.connector).context("failed to build HTTP connector")?;
    let runner = TaskRunner::new(
        Arc::new(db),
        SyncEngine::new(Arc::new(connector)),
        RetryPolicy::none(),
        1,
    );
    Ok(ControlPlane::new(runner))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# integrasync configuration

[daemon]
scheduled_scan_interval_secs = 900
log_level = "info"
data_dir = "/var/lib/integrasync"

[runner]
workers = 4
max_retries = 3
retry_backoff_secs = 60
queue_capacity = 256

[connector]
request_timeout_secs = 30
health_timeout_secs = 10

[web]
listen = "127.0.0.1:3000"

# Systems are upserted by name when the daemon starts.
[[systems]]
name = "lms"
description = "Learning management system"
api_endpoint = "https://lms.example.com/api"
api_key_env = "LMS_API_KEY"

[[systems]]
name = "crm"
description = "Customer relationship management"
api_endpoint = "https://crm.example.com/api"
api_key_env = "CRM_API_KEY"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[systems]] entries with your API endpoints");
    println!("  2. Set the referenced environment variables (LMS_API_KEY, CRM_API_KEY)");
    println!(
        "  3. Validate with: integrasync validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: integrasync-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.resolve_env_vars() {
        Ok(()) => println!("  [OK] System API keys resolved"),
        Err(e) => println!("  {}", style::warn(&format!("API keys: {}", e))),
    }

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Scan interval : {}s", config.daemon.scheduled_scan_interval_secs);
    println!("  Workers       : {}", config.runner.workers);
    println!(
        "  Retries       : {} (backoff {}s x attempt)",
        config.runner.max_retries, config.runner.retry_backoff_secs
    );
    println!("  Web listen    : {}", config.web.listen);
    println!("  Data directory: {}", config.daemon.data_dir.display());
    println!("  Seeded systems: {}", config.systems.len());
    for seed in &config.systems {
        println!(
            "    - {:<16} {} (key {})",
            seed.name,
            seed.api_endpoint,
            if seed.api_key.is_some() { "set" } else { "NOT SET" }
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_status(control: &ControlPlane) -> Result<()> {
    let summary = control.dashboard().context("failed to read dashboard")?;

    println!("{}", style::header("integrasync status"));
    println!();
    println!("  Tasks            : {}", summary.total_tasks);
    println!("    pending        : {}", summary.pending_tasks);
    println!("    running        : {}", summary.running_tasks);
    println!("    completed      : {}", summary.completed_tasks);
    println!("    failed         : {}", summary.failed_tasks);
    println!("  Events recorded  : {}", summary.total_events);

    if summary.recent_errors.is_empty() {
        println!();
        println!("{}", style::dim("No recent errors."));
        return Ok(());
    }

    println!();
    println!("{}", style::header("Recent errors"));
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["When", "Task", "Message"]);
    for event in &summary.recent_errors {
        table.add_row(vec![
            Cell::new(event.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&event.task_id),
            Cell::new(truncate(&event.message, 80)),
        ]);
    }
    println!("{}", table);

    Ok(())
}

async fn cmd_systems(control: &ControlPlane, action: SystemsAction) -> Result<()> {
    match action {
        SystemsAction::List => {
            let systems = control.list_systems().context("failed to list systems")?;
            if systems.is_empty() {
                println!("No systems registered.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Name", "Endpoint", "Active"]);
            for system in &systems {
                let active = if system.is_active {
                    Cell::new("yes").fg(comfy_table::Color::Green)
                } else {
                    Cell::new("no").fg(comfy_table::Color::Red)
                };
                table.add_row(vec![
                    Cell::new(&system.id),
                    Cell::new(&system.name),
                    Cell::new(&system.api_endpoint),
                    active,
                ]);
            }
            println!("{}", table);
            Ok(())
        }
        SystemsAction::Test { id } => {
            let result = control
                .test_connection(&id)
                .await
                .context("connection test failed")?;
            let line = match &result.details {
                Some(report) => format!(
                    "{} (HTTP {}, {:.3}s)",
                    result.message, report.status_code, report.response_time_secs
                ),
                None => result.message.clone(),
            };
            if result.success {
                println!("{}", style::success(&line));
                Ok(())
            } else {
                println!("{}", style::error(&line));
                anyhow::bail!("system {} is not healthy", id)
            }
        }
    }
}

fn cmd_tasks(control: &ControlPlane, action: TasksAction) -> Result<()> {
    match action {
        TasksAction::List => {
            let tasks = control.list_tasks().context("failed to list tasks")?;
            if tasks.is_empty() {
                println!("No tasks configured.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Name", "Direction", "Status", "Schedule", "Last run"]);
            for task in &tasks {
                let schedule = match (task.schedule_enabled, task.schedule_interval) {
                    (false, _) => "off".to_string(),
                    (true, Some(minutes)) => format!("every {}m", minutes),
                    (true, None) => "every scan".to_string(),
                };
                table.add_row(vec![
                    Cell::new(&task.id),
                    Cell::new(&task.name),
                    Cell::new(task.direction.as_str()),
                    style::status_cell(task.status),
                    Cell::new(schedule),
                    Cell::new(
                        task.last_run
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "never".to_string()),
                    ),
                ]);
            }
            println!("{}", table);
            Ok(())
        }
        TasksAction::Show { id } => {
            let task = control.get_task(&id).context("failed to load task")?;
            let mappings = control.list_mappings(&id).context("failed to list mappings")?;
            let events = control
                .task_events(
                    &id,
                    &Pagination {
                        page: 1,
                        per_page: 10,
                    },
                )
                .context("failed to list events")?;

            println!("{}", style::header(&task.name));
            println!("  ID        : {}", task.id);
            println!("  Direction : {}", task.direction);
            println!("  Status    : {}", task.status);
            println!("  System A  : {}", task.system_a_id);
            println!("  System B  : {}", task.system_b_id);
            println!();

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Field A", "Field B", "Rule", "Required"]);
            for mapping in &mappings {
                let rule = mapping
                    .transformation_rule
                    .as_ref()
                    .map(|r| r.to_value().to_string())
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    Cell::new(&mapping.field_a),
                    Cell::new(&mapping.field_b),
                    Cell::new(rule),
                    Cell::new(if mapping.is_required { "yes" } else { "no" }),
                ]);
            }
            println!("{}", table);
            println!();
            println!(
                "Latest events ({} of {}):",
                events.items.len(),
                events.total
            );
            for event in &events.items {
                println!(
                    "  {} {:<14} {}",
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    truncate(&event.message, 60)
                );
            }
            Ok(())
        }
    }
}

async fn cmd_run(control: &ControlPlane, task_id: &str) -> Result<()> {
    println!("Running task {} ...", task_id);
    let outcome = control
        .runner()
        .run_now(task_id)
        .await
        .context("failed to start run")?;

    match outcome {
        RunOutcome::Completed(result) => {
            println!(
                "{}",
                style::success(&format!("{} record(s) synced", result.records_synced))
            );
            Ok(())
        }
        RunOutcome::Failed { error, .. } => {
            println!("{}", style::error(&error));
            anyhow::bail!("task {} failed", task_id)
        }
        RunOutcome::Vanished => {
            anyhow::bail!("task {} was deleted during the run", task_id)
        }
    }
}

fn cmd_events(
    control: &ControlPlane,
    task: Option<String>,
    event_type: Option<String>,
    limit: u32,
) -> Result<()> {
    let event_type = event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let events = control
        .events(
            &EventFilter {
                task_id: task,
                event_type,
            },
            limit,
        )
        .context("failed to list events")?;

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "When", "Task", "Type", "Records", "Message"]);
    for event in &events {
        table.add_row(vec![
            Cell::new(event.id),
            Cell::new(event.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&event.task_id),
            style::event_cell(event.event_type),
            Cell::new(event.records_synced),
            Cell::new(truncate(&event.message, 60)),
        ]);
    }
    println!("{}", table);
    println!("{}", style::dim(&format!("{} events shown", events.len())));

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrasync.toml");
        cmd_init(&path).unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.systems.len(), 2);
        assert_eq!(config.systems[0].api_key_env.as_deref(), Some("LMS_API_KEY"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrasync.toml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(cmd_init(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }
}
