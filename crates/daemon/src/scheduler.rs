//! Periodic scan that submits every due scheduled task to the runner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time;
use tracing::{error, info};

use integrasync_core::runner::TaskRunner;

/// Aggregate counters across scans.
#[derive(Default)]
pub struct ScanStats {
    pub total_scans: AtomicU64,
    pub total_submitted: AtomicU64,
    pub total_errors: AtomicU64,
}

/// Runs [`TaskRunner::run_scheduled`] on a fixed interval.
///
/// A scan only submits jobs and never waits for runs, so scans cannot
/// overlap even when individual runs take longer than the interval.
pub struct Scheduler {
    runner: TaskRunner,
    scan_interval: Duration,
    ws_broadcast: broadcast::Sender<String>,
    stats: Arc<ScanStats>,
}

impl Scheduler {
    pub fn new(
        runner: TaskRunner,
        scan_interval: Duration,
        ws_broadcast: broadcast::Sender<String>,
    ) -> Self {
        Self {
            runner,
            scan_interval,
            ws_broadcast,
            stats: Arc::new(ScanStats::default()),
        }
    }

    /// Counters shared with the caller.
    pub fn stats(&self) -> Arc<ScanStats> {
        self.stats.clone()
    }

    /// Scan until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        // Registered up front so a notification sent mid-scan is not lost.
        let stopped = shutdown.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            "scheduler started"
        );

        let mut interval = time::interval(self.scan_interval);
        // Skip the immediate first tick so startup finishes before the first scan.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.scan().await,
                _ = &mut stopped => break,
            }
        }

        info!(
            scans = self.stats.total_scans.load(Ordering::SeqCst),
            submitted = self.stats.total_submitted.load(Ordering::SeqCst),
            errors = self.stats.total_errors.load(Ordering::SeqCst),
            "scheduler stopped"
        );
    }

    async fn scan(&self) {
        let scan = self.stats.total_scans.fetch_add(1, Ordering::SeqCst) + 1;

        match self.runner.run_scheduled().await {
            Ok(report) => {
                self.stats
                    .total_submitted
                    .fetch_add(report.submitted as u64, Ordering::SeqCst);
                info!(
                    scan,
                    submitted = report.submitted,
                    not_due = report.not_due,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    "scheduled scan finished"
                );
                let msg = serde_json::json!({
                    "type": "scan_completed",
                    "scan": scan,
                    "submitted": report.submitted,
                    "not_due": report.not_due,
                    "conflicts": report.conflicts,
                    "failed": report.failed,
                });
                let _ = self.ws_broadcast.send(msg.to_string());
            }
            Err(e) => {
                let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(scan, error = %e, total_errors = errors, "scheduled scan failed");
                let msg = serde_json::json!({
                    "type": "scan_failed",
                    "scan": scan,
                    "error": e.to_string(),
                });
                let _ = self.ws_broadcast.send(msg.to_string());
            }
        }
    }
}
