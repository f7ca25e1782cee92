//! Event dispatch: trigger match → admission → execution → job.
//!
//! Dispatch is fire-and-forget. `handle_event` returns as soon as the
//! execution records and jobs exist; workers pick the jobs up
//! out-of-band. Admission failures surface synchronously to the caller
//! and are never retried here.

use crate::error::EngineError;
use flowline_admission::AdmissionController;
use flowline_core::{ExecutionId, JobId, TenantId, WorkflowId};
use flowline_execution::{Execution, ExecutionStore, ExecutionUpdate};
use flowline_queue::{Job, JobStore, QueueError};
use flowline_workflow::{find_matching, TriggerEvent, TriggerKind, Workflow, WorkflowStore};
use std::sync::Arc;

/// What one matched workflow produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// The workflow that fired.
    pub workflow_id: WorkflowId,
    /// The execution created for it.
    pub execution_id: ExecutionId,
    /// The job driving that execution.
    pub job_id: JobId,
}

/// Front door for inbound events and operator actions on executions.
pub struct Engine {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    jobs: Arc<dyn JobStore>,
    admission: AdmissionController,
}

impl Engine {
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        jobs: Arc<dyn JobStore>,
        admission: AdmissionController,
    ) -> Self {
        Self {
            workflows,
            executions,
            jobs,
            admission,
        }
    }

    /// Matches an event against the tenant's active workflows and
    /// dispatches one execution per match.
    ///
    /// No match is a normal outcome and returns an empty list. An
    /// admission refusal aborts the call; dispatches already made for
    /// earlier matches stand.
    pub async fn handle_event(
        &self,
        tenant_id: TenantId,
        event: TriggerEvent,
    ) -> Result<Vec<Dispatch>, EngineError> {
        let workflows = self.workflows.list_active(tenant_id).await?;
        let matches = find_matching(&workflows, &event);

        let mut dispatches = Vec::with_capacity(matches.len());
        for matched in matches {
            let workflow = workflows
                .iter()
                .find(|w| w.id == matched.workflow_id)
                .ok_or(QueueError::Store {
                    message: "matched workflow vanished from listing".to_string(),
                })?;
            let dispatch = self.dispatch(workflow, event.clone()).await?;
            dispatches.push(dispatch);
        }
        tracing::debug!(
            %tenant_id,
            kind = event.kind.as_str(),
            source = %event.source,
            dispatched = dispatches.len(),
            "event handled"
        );
        Ok(dispatches)
    }

    async fn dispatch(
        &self,
        workflow: &Workflow,
        event: TriggerEvent,
    ) -> Result<Dispatch, EngineError> {
        // Admission runs before any record exists: a refused event
        // leaves nothing behind.
        self.admission.admit(workflow.tenant_id).await?;

        let version = workflow
            .published_version
            .ok_or(EngineError::NotPublished {
                workflow_id: workflow.id,
            })?;

        let mut execution = Execution::new(workflow.id, workflow.tenant_id, version, event);
        execution.context.variables = workflow.variables.clone();
        self.executions.create(execution.clone()).await?;

        let job = Job::new(
            workflow.id,
            execution.id,
            workflow.tenant_id,
            workflow.settings.priority,
            workflow.settings.max_attempts,
        );
        self.jobs.enqueue(job.clone()).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            job_id = %job.id,
            version,
            "execution dispatched"
        );
        Ok(Dispatch {
            workflow_id: workflow.id,
            execution_id: execution.id,
            job_id: job.id,
        })
    }

    /// Re-runs an execution from its stored trigger payload.
    ///
    /// Works for any source execution regardless of status. The new
    /// run gets its own execution and job, a replay trigger naming the
    /// source execution, and the workflow's current published version.
    pub async fn replay(&self, execution_id: ExecutionId) -> Result<Dispatch, EngineError> {
        let source = self.executions.get(execution_id).await?;
        let workflow = self.workflows.get(source.workflow_id).await?;

        let mut event = TriggerEvent::new(
            TriggerKind::Replay,
            source.id.to_string(),
            source.trigger.payload.clone(),
        );
        event.meta = source.trigger.meta.clone();
        self.dispatch(&workflow, event).await
    }

    /// Cancels an execution and the job driving it.
    ///
    /// The job is cancelled first so a mid-run worker sees the
    /// terminal job and stops; then the execution record is marked
    /// cancelled. A worker that already observed the cancel may have
    /// done the second step for us, which is fine.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        if let Some(job) = self.jobs.find_by_execution(execution_id).await? {
            if !job.status.is_terminal() {
                self.jobs.cancel(job.id).await?;
            }
        }
        match self.executions.update(execution_id, ExecutionUpdate::cancelled()).await {
            Ok(_) => Ok(()),
            Err(flowline_execution::ExecutionError::TerminalImmutable { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Operator retry: forces the execution's job back to pending and
    /// reopens the record for the next delivery.
    pub async fn retry(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let Some(job) = self.jobs.find_by_execution(execution_id).await? else {
            return Err(EngineError::Queue(QueueError::Store {
                message: format!("no job found for execution {execution_id}"),
            }));
        };
        self.jobs.retry(job.id).await?;
        self.executions.reopen(execution_id).await?;
        Ok(())
    }
}
