//! Retention janitor: periodic purge of expired rows.
//!
//! Jobs and logs age out after their retention windows; terminal
//! executions after theirs. Purge failures are logged and retried on
//! the next tick rather than crashing the task.

use chrono::Utc;
use flowline_execution::{ExecutionStore, LogSink};
use flowline_queue::JobStore;
use std::sync::Arc;
use std::time::Duration;

pub struct Janitor {
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    logs: Arc<dyn LogSink>,
    interval: Duration,
}

impl Janitor {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        logs: Arc<dyn LogSink>,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            executions,
            logs,
            interval,
        }
    }

    /// Runs forever; spawn this on its own task.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    /// One purge pass over all retained tables.
    pub async fn sweep(&self) {
        let now = Utc::now();

        match self.jobs.purge_expired(now).await {
            Ok(count) if count > 0 => {
                tracing::info!(purged_jobs = count, "purged expired jobs");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "job purge failed"),
        }

        match self.logs.purge_expired(now).await {
            Ok(count) if count > 0 => {
                tracing::info!(purged_log_entries = count, "purged expired execution logs");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "log purge failed"),
        }

        match self.executions.purge_expired(now).await {
            Ok(count) if count > 0 => {
                tracing::info!(purged_executions = count, "purged expired executions");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "execution purge failed"),
        }
    }
}
