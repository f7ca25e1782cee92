//! The worker poll loop: claim, run, report.
//!
//! A worker repeatedly claims the best eligible job, loads the pinned
//! snapshot, runs the graph through its [`WorkflowRunner`], and
//! reports the outcome into both the queue and the execution record.
//! No path leaves a job processing: success completes it, any runner
//! error either schedules a retry or fails it terminally, and a
//! crashed worker is covered by stale-lock reclamation.
//!
//! Cancellation is cooperative. While the runner future is in flight
//! the worker also polls the job's status; when an operator cancels
//! the job the runner future is dropped and the run stops cleanly.

use crate::error::EngineError;
use crate::runner::{RunRequest, WorkflowRunner};
use flowline_core::{ExecutionId, JobId};
use flowline_execution::{
    Execution, ExecutionError, ExecutionLogEntry, ExecutionStatus, ExecutionStore, ExecutionUpdate,
    LogLevel, LogSink,
};
use flowline_queue::{Job, JobStore};
use flowline_workflow::SnapshotStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when the queue has nothing eligible.
    pub idle_wait: Duration,
    /// How often to check for external cancellation mid-run.
    pub cancel_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_secs(1),
            cancel_poll: Duration::from_millis(250),
        }
    }
}

/// One claim-run-report loop over the job queue.
pub struct Worker {
    id: String,
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    logs: Arc<dyn LogSink>,
    runner: Arc<dyn WorkflowRunner>,
    config: WorkerConfig,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        logs: Arc<dyn LogSink>,
        runner: Arc<dyn WorkflowRunner>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            jobs,
            executions,
            snapshots,
            logs,
            runner,
            config,
        }
    }

    /// Runs the poll loop until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(worker = %self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.idle_wait) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(worker = %self.id, error = %err, "poll failed");
                    tokio::time::sleep(self.config.idle_wait).await;
                }
            }
        }
        tracing::info!(worker = %self.id, "worker stopped");
    }

    /// Claims and processes at most one job. Returns whether a job was
    /// processed.
    pub async fn poll_once(&self) -> Result<bool, EngineError> {
        let Some(job) = self.jobs.claim(&self.id).await? else {
            return Ok(false);
        };
        self.process(job).await?;
        Ok(true)
    }

    async fn process(&self, job: Job) -> Result<(), EngineError> {
        tracing::debug!(worker = %self.id, job_id = %job.id, attempt = job.attempts, "claimed job");

        let execution = match self.executions.get(job.execution_id).await {
            Ok(execution) => execution,
            Err(err) => {
                // A job without its execution record cannot be run.
                self.jobs.fail(job.id, &err.to_string(), false).await?;
                return Ok(());
            }
        };

        if self
            .apply_update(job.execution_id, ExecutionUpdate::started())
            .await?
            .is_none()
        {
            // Execution went terminal (cancelled) before we started.
            if let Err(err) = self.jobs.cancel(job.id).await {
                tracing::warn!(job_id = %job.id, error = %err, "could not cancel orphaned job");
            }
            return Ok(());
        }
        self.log(&execution, LogLevel::Info, "run_started", "worker picked up the job")
            .await;

        let snapshot = match self
            .snapshots
            .get(job.workflow_id, execution.workflow_version)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.jobs.fail(job.id, &err.to_string(), false).await?;
                let failure = flowline_execution::ExecutionFailure::new(
                    None,
                    "snapshot_missing",
                    err.to_string(),
                );
                self.apply_update(job.execution_id, ExecutionUpdate::failed(failure))
                    .await?;
                return Ok(());
            }
        };

        let request = RunRequest {
            execution_id: execution.id,
            tenant_id: execution.tenant_id,
            graph: snapshot.graph,
            trigger: execution.trigger.clone(),
            variables: execution.context.variables.clone(),
        };

        // Dropping the runner future is how cancellation takes effect.
        let result = tokio::select! {
            result = self.runner.run(request) => Some(result),
            () = self.watch_for_cancel(job.id) => None,
        };

        match result {
            None => {
                self.apply_update(job.execution_id, ExecutionUpdate::cancelled())
                    .await?;
                self.log(&execution, LogLevel::Warn, "run_cancelled", "cancelled mid-run")
                    .await;
            }
            Some(Ok(outcome)) => {
                self.jobs.complete(job.id, outcome.output).await?;
                let mut update = outcome.update;
                update.status = Some(ExecutionStatus::Completed);
                self.apply_update(job.execution_id, update).await?;
                self.log(&execution, LogLevel::Info, "run_completed", "all nodes finished")
                    .await;
            }
            Some(Err(err)) => {
                let failed = self
                    .jobs
                    .fail(job.id, &err.to_string(), err.kind.is_retryable())
                    .await?;
                let retry_scheduled = !failed.status.is_terminal();

                let mut update = err.partial.unwrap_or_default();
                update.failure = Some(err.failure);
                update.status = Some(if retry_scheduled {
                    // Back to pending for the next delivery.
                    ExecutionStatus::Pending
                } else {
                    ExecutionStatus::Failed
                });
                self.apply_update(job.execution_id, update).await?;

                if retry_scheduled {
                    self.log(
                        &execution,
                        LogLevel::Warn,
                        "run_retry_scheduled",
                        format!("attempt {} failed, retry at {}", failed.attempts, failed.run_at),
                    )
                    .await;
                } else {
                    self.log(&execution, LogLevel::Error, "run_failed", "retries exhausted")
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Applies an update, treating a terminal record as "someone else
    /// finished this first" rather than an error.
    async fn apply_update(
        &self,
        id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<Option<Execution>, EngineError> {
        match self.executions.update(id, update).await {
            Ok(execution) => Ok(Some(execution)),
            Err(ExecutionError::TerminalImmutable { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolves when the job reaches a terminal state under our feet,
    /// which only an external cancel can cause while we hold the lock.
    async fn watch_for_cancel(&self, job_id: JobId) {
        loop {
            tokio::time::sleep(self.config.cancel_poll).await;
            match self.jobs.get(job_id).await {
                Ok(job) if job.status.is_terminal() => return,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(%job_id, error = %err, "cancel watch read failed");
                }
            }
        }
    }

    async fn log(
        &self,
        execution: &Execution,
        level: LogLevel,
        event: &str,
        message: impl Into<String>,
    ) {
        let entry = ExecutionLogEntry::new(execution.id, None, level, event, message)
            .with_data(json!({"worker": self.id}));
        if let Err(err) = self.logs.append(entry).await {
            tracing::warn!(execution_id = %execution.id, error = %err, "log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunOutcome, RunnerError};
    use async_trait::async_trait;
    use flowline_core::TenantId;
    use flowline_execution::{ExecutionFailure, InMemoryExecutionStore, InMemoryLogSink};
    use flowline_queue::{InMemoryJobStore, JobStatus};
    use chrono::Utc;
    use flowline_workflow::{
        InMemorySnapshotStore, Node, NodeConfig, TriggerConfig, TriggerEvent, TriggerKind,
        Workflow, WorkflowGraph, WorkflowSnapshot,
    };
    use serde_json::json;

    struct OkRunner;

    #[async_trait]
    impl WorkflowRunner for OkRunner {
        async fn run(&self, request: RunRequest) -> Result<RunOutcome, RunnerError> {
            let node = request.graph.nodes[0].id;
            Ok(RunOutcome {
                update: ExecutionUpdate::default().node_completed(node, json!({"sent": 1}), 5),
                output: json!({"ok": true}),
            })
        }
    }

    struct FailRunner {
        retryable: bool,
    }

    #[async_trait]
    impl WorkflowRunner for FailRunner {
        async fn run(&self, _request: RunRequest) -> Result<RunOutcome, RunnerError> {
            let failure = ExecutionFailure::new(None, "upstream_timeout", "no answer");
            Err(if self.retryable {
                RunnerError::transient(failure)
            } else {
                RunnerError::permanent(failure)
            })
        }
    }

    struct SlowRunner;

    #[async_trait]
    impl WorkflowRunner for SlowRunner {
        async fn run(&self, _request: RunRequest) -> Result<RunOutcome, RunnerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RunOutcome {
                update: ExecutionUpdate::default(),
                output: json!(null),
            })
        }
    }

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        executions: Arc<InMemoryExecutionStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        logs: Arc<InMemoryLogSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                jobs: Arc::new(InMemoryJobStore::new()),
                executions: Arc::new(InMemoryExecutionStore::new()),
                snapshots: Arc::new(InMemorySnapshotStore::new()),
                logs: Arc::new(InMemoryLogSink::new()),
            }
        }

        fn worker(&self, runner: Arc<dyn WorkflowRunner>) -> Worker {
            Worker::new(
                "worker-test",
                self.jobs.clone(),
                self.executions.clone(),
                self.snapshots.clone(),
                self.logs.clone(),
                runner,
                WorkerConfig {
                    idle_wait: Duration::from_millis(5),
                    cancel_poll: Duration::from_millis(5),
                },
            )
        }

        /// Seeds a published workflow, a pending execution pinned to
        /// it, and its job. Returns (execution, job).
        async fn seed(&self) -> (Execution, Job) {
            let mut workflow = Workflow::new(TenantId::new(), "notify", "Notify");
            let mut graph = WorkflowGraph::new();
            let trigger = graph.add_node(Node::new(
                "start",
                NodeConfig::Trigger(TriggerConfig::Manual),
            ));
            let step = graph.add_node(Node::new(
                "send",
                NodeConfig::Integration {
                    service: "mail".to_string(),
                    config: json!({}),
                },
            ));
            graph.add_edge(trigger, step);
            workflow.set_graph(graph);

            let snapshot = WorkflowSnapshot::new(
                workflow.id,
                workflow.version,
                workflow.graph.clone(),
                None,
            );
            self.snapshots.append_active(snapshot).await.unwrap();

            let event = TriggerEvent::new(TriggerKind::Manual, workflow.id.to_string(), json!({}));
            let execution =
                Execution::new(workflow.id, workflow.tenant_id, workflow.version, event);
            self.executions.create(execution.clone()).await.unwrap();

            let job = Job::new(workflow.id, execution.id, workflow.tenant_id, 0, 3);
            self.jobs.enqueue(job.clone()).await.unwrap();
            (execution, job)
        }
    }

    #[tokio::test]
    async fn successful_run_completes_job_and_execution() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        let worker = fx.worker(Arc::new(OkRunner));

        assert!(worker.poll_once().await.unwrap());

        let job = fx.jobs.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));

        let execution = fx.executions.get(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_nodes.len(), 1);

        let events: Vec<String> = fx
            .logs
            .read(execution.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(events, vec!["run_started", "run_completed"]);
    }

    #[tokio::test]
    async fn empty_queue_is_not_an_error() {
        let fx = Fixture::new();
        let worker = fx.worker(Arc::new(OkRunner));
        assert!(!worker.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn transient_failure_reschedules_and_resets_execution() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        let worker = fx.worker(Arc::new(FailRunner { retryable: true }));

        worker.poll_once().await.unwrap();

        let job = fx.jobs.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.run_at > Utc::now() - chrono::Duration::seconds(1));

        let execution = fx.executions.get(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(
            execution.failure.as_ref().map(|f| f.code.as_str()),
            Some("upstream_timeout")
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_for_both() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        let worker = fx.worker(Arc::new(FailRunner { retryable: false }));

        worker.poll_once().await.unwrap();

        assert_eq!(fx.jobs.get(job.id).await.unwrap().status, JobStatus::Failed);
        assert_eq!(
            fx.executions.get(execution.id).await.unwrap().status,
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_terminally() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        let worker = fx.worker(Arc::new(FailRunner { retryable: true }));

        for _ in 0..3 {
            worker.poll_once().await.unwrap();
            // Make the rescheduled job immediately claimable again.
            if !fx.jobs.get(job.id).await.unwrap().status.is_terminal() {
                fx.jobs.retry(job.id).await.unwrap();
            }
        }

        let job = fx.jobs.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(
            fx.executions.get(execution.id).await.unwrap().status,
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn external_cancel_stops_the_run() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        let worker = Arc::new(fx.worker(Arc::new(SlowRunner)));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.poll_once().await })
        };

        // Wait for the worker to claim, then cancel out from under it.
        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.jobs.cancel(job.id).await.unwrap();

        assert!(handle.await.unwrap().unwrap());
        let execution = fx.executions.get(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn missing_snapshot_fails_permanently() {
        let fx = Fixture::new();
        let (execution, job) = fx.seed().await;
        // Point the execution at a version that was never snapshotted.
        let mut broken = fx.executions.get(execution.id).await.unwrap();
        broken.workflow_version = 999;
        fx.executions.create(broken).await.unwrap();

        let worker = fx.worker(Arc::new(OkRunner));
        worker.poll_once().await.unwrap();

        assert_eq!(fx.jobs.get(job.id).await.unwrap().status, JobStatus::Failed);
        let execution = fx.executions.get(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.failure.as_ref().map(|f| f.code.as_str()),
            Some("snapshot_missing")
        );
    }
}
