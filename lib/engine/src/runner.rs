//! The seam between the worker loop and node execution.
//!
//! Actually running nodes (HTTP calls, data transforms, integrations)
//! is an external collaborator's job. The worker hands a runner the
//! pinned graph and the trigger that fired, and gets back either the
//! accumulated node outcomes or a classified failure.

use async_trait::async_trait;
use flowline_core::{ExecutionId, TenantId};
use flowline_execution::{ExecutionFailure, ExecutionUpdate};
use flowline_queue::FailureKind;
use flowline_workflow::{TriggerEvent, WorkflowGraph};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Everything a runner needs to execute one workflow run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The execution being driven.
    pub execution_id: ExecutionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The graph from the pinned snapshot.
    pub graph: WorkflowGraph,
    /// The event that started the run.
    pub trigger: TriggerEvent,
    /// Variable defaults from the workflow definition.
    pub variables: BTreeMap<String, JsonValue>,
}

/// A successful run: node outcomes plus the final output payload.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Node outcomes, context writes, and timings accumulated by the
    /// runner. The worker adds the terminal status.
    pub update: ExecutionUpdate,
    /// Final output, recorded on the job.
    pub output: JsonValue,
}

/// A failed run, classified for the retry decision.
#[derive(Debug, Clone)]
pub struct RunnerError {
    /// Whether the queue should retry.
    pub kind: FailureKind,
    /// Structured failure detail for the execution record.
    pub failure: ExecutionFailure,
    /// Partial progress made before the failure, if any.
    pub partial: Option<ExecutionUpdate>,
}

impl RunnerError {
    /// A transient failure worth retrying.
    #[must_use]
    pub fn transient(failure: ExecutionFailure) -> Self {
        Self {
            kind: FailureKind::Transient,
            failure,
            partial: None,
        }
    }

    /// A permanent failure retrying cannot fix.
    #[must_use]
    pub fn permanent(failure: ExecutionFailure) -> Self {
        Self {
            kind: FailureKind::Permanent,
            failure,
            partial: None,
        }
    }

    /// Attaches the progress made before the failure.
    #[must_use]
    pub fn with_partial(mut self, partial: ExecutionUpdate) -> Self {
        self.partial = Some(partial);
        self
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.failure.code, self.failure.message)
    }
}

impl std::error::Error for RunnerError {}

/// Executes a workflow graph for one run.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Runs the graph to completion or failure. The future may be
    /// dropped mid-run when the execution is cancelled; runners must
    /// tolerate that.
    async fn run(&self, request: RunRequest) -> Result<RunOutcome, RunnerError>;
}
