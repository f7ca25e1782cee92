//! Execution lifecycle records.
//!
//! An execution is the durable record of one workflow run: the trigger
//! that started it, the workflow version it is pinned to, per-node
//! outcomes, accumulated context, and timing. All mutation flows
//! through [`ExecutionUpdate`] via [`Execution::apply`]; once a record
//! reaches a terminal status it can never change again.

use crate::error::ExecutionError;
use chrono::{DateTime, Duration, Utc};
use flowline_core::{ExecutionId, TenantId, WorkflowId};
use flowline_workflow::{NodeId, TriggerEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// How long finished executions are retained before being purged.
pub const EXECUTION_RETENTION: Duration = Duration::days(30);

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created and admitted; waiting for a worker.
    Pending,
    /// A worker is running the graph.
    Running,
    /// All nodes finished successfully (or were skipped).
    Completed,
    /// A node failed and the run could not recover.
    Failed,
    /// Cancelled by an operator before finishing.
    Cancelled,
}

impl ExecutionStatus {
    /// Stable string form used in records and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A structured description of what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// The node that failed, when the failure is attributable to one.
    pub node_id: Option<NodeId>,
    /// Stable machine-readable code, e.g. `upstream_timeout`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

impl ExecutionFailure {
    /// Creates a failure record stamped at the current time.
    #[must_use]
    pub fn new(node_id: Option<NodeId>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id,
            code: code.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Variables and per-node outputs accumulated during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Workflow variables, seeded from the definition's defaults and
    /// overridable during the run.
    pub variables: BTreeMap<String, JsonValue>,
    /// Output payload of each finished node.
    pub node_outputs: BTreeMap<NodeId, JsonValue>,
}

/// Timing measurements for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Wall-clock duration of the whole run, set at completion.
    pub total_ms: i64,
    /// Wall-clock duration of each node.
    pub node_ms: BTreeMap<NodeId, i64>,
}

/// The durable record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The snapshot version this run is pinned to. Edits made after
    /// dispatch never affect an in-flight run.
    pub workflow_version: i64,
    /// The event that started this run, kept verbatim so the run can
    /// be replayed later.
    pub trigger: TriggerEvent,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Nodes that finished successfully.
    pub completed_nodes: BTreeSet<NodeId>,
    /// Nodes that failed.
    pub failed_nodes: BTreeSet<NodeId>,
    /// Nodes that were skipped (branch not taken, or downstream of a
    /// failure).
    pub skipped_nodes: BTreeSet<NodeId>,
    /// Accumulated variables and node outputs.
    pub context: ExecutionContext,
    /// Timing measurements.
    pub metrics: ExecutionMetrics,
    /// Structured failure detail, present when status is failed.
    pub failure: Option<ExecutionFailure>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When a worker started running the graph.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the record may be purged.
    pub expires_at: DateTime<Utc>,
}

impl Execution {
    /// Creates a pending execution pinned to a workflow version.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        tenant_id: TenantId,
        workflow_version: i64,
        trigger: TriggerEvent,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            workflow_id,
            tenant_id,
            workflow_version,
            trigger,
            status: ExecutionStatus::Pending,
            completed_nodes: BTreeSet::new(),
            failed_nodes: BTreeSet::new(),
            skipped_nodes: BTreeSet::new(),
            context: ExecutionContext::default(),
            metrics: ExecutionMetrics::default(),
            failure: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + EXECUTION_RETENTION,
        }
    }

    /// Applies an update to this record.
    ///
    /// This is the only mutation path. Updates to a record already in
    /// a terminal status are rejected with `TerminalImmutable`, so a
    /// late-reporting worker cannot overwrite a cancellation.
    pub fn apply(&mut self, update: ExecutionUpdate) -> Result<(), ExecutionError> {
        if self.status.is_terminal() {
            return Err(ExecutionError::TerminalImmutable {
                execution_id: self.id,
                status: self.status,
            });
        }

        let now = Utc::now();
        self.completed_nodes.extend(update.completed_nodes);
        self.failed_nodes.extend(update.failed_nodes);
        self.skipped_nodes.extend(update.skipped_nodes);
        self.context.variables.extend(update.variables);
        self.context.node_outputs.extend(update.node_outputs);
        self.metrics.node_ms.extend(update.node_ms);
        if let Some(failure) = update.failure {
            self.failure = Some(failure);
        }

        self.apply_status(update.status, now);
        Ok(())
    }

    /// Reopens a failed, cancelled, or stalled record for another
    /// delivery, as part of an operator retry.
    ///
    /// This is the one sanctioned exception to terminal immutability,
    /// and it never applies to completed runs: a run that succeeded
    /// can only be re-executed via replay. The failure detail is kept
    /// for diagnostics.
    pub fn reopen(&mut self) -> Result<(), ExecutionError> {
        if self.status == ExecutionStatus::Completed {
            return Err(ExecutionError::TerminalImmutable {
                execution_id: self.id,
                status: self.status,
            });
        }
        self.status = ExecutionStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    fn apply_status(&mut self, status: Option<ExecutionStatus>, now: DateTime<Utc>) {
        if let Some(status) = status {
            self.status = status;
            match status {
                ExecutionStatus::Running => {
                    if self.started_at.is_none() {
                        self.started_at = Some(now);
                    }
                }
                ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled => {
                    self.completed_at = Some(now);
                    let from = self.started_at.unwrap_or(self.created_at);
                    self.metrics.total_ms = (now - from).num_milliseconds();
                }
                ExecutionStatus::Pending => {}
            }
        }
    }
}

/// A batch of changes to apply to an execution record.
///
/// Workers accumulate node outcomes into updates and apply them as
/// they go, so a crashed worker leaves behind the progress it made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    /// New status, if the lifecycle advances.
    pub status: Option<ExecutionStatus>,
    /// Nodes that finished successfully since the last update.
    pub completed_nodes: Vec<NodeId>,
    /// Nodes that failed since the last update.
    pub failed_nodes: Vec<NodeId>,
    /// Nodes that were skipped since the last update.
    pub skipped_nodes: Vec<NodeId>,
    /// Variable writes to merge into the context.
    pub variables: BTreeMap<String, JsonValue>,
    /// Node outputs to merge into the context.
    pub node_outputs: BTreeMap<NodeId, JsonValue>,
    /// Node timings to merge into the metrics.
    pub node_ms: BTreeMap<NodeId, i64>,
    /// Failure detail, set together with a failed status.
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionUpdate {
    /// An update that marks the run as started.
    #[must_use]
    pub fn started() -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            ..Self::default()
        }
    }

    /// An update that marks the run as completed.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            status: Some(ExecutionStatus::Completed),
            ..Self::default()
        }
    }

    /// An update that marks the run as failed with structured detail.
    #[must_use]
    pub fn failed(failure: ExecutionFailure) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// An update that marks the run as cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            status: Some(ExecutionStatus::Cancelled),
            ..Self::default()
        }
    }

    /// Records a successful node with its output and timing.
    #[must_use]
    pub fn node_completed(mut self, node_id: NodeId, output: JsonValue, elapsed_ms: i64) -> Self {
        self.completed_nodes.push(node_id);
        self.node_outputs.insert(node_id, output);
        self.node_ms.insert(node_id, elapsed_ms);
        self
    }

    /// Records a failed node.
    #[must_use]
    pub fn node_failed(mut self, node_id: NodeId, elapsed_ms: i64) -> Self {
        self.failed_nodes.push(node_id);
        self.node_ms.insert(node_id, elapsed_ms);
        self
    }

    /// Records a skipped node.
    #[must_use]
    pub fn node_skipped(mut self, node_id: NodeId) -> Self {
        self.skipped_nodes.push(node_id);
        self
    }

    /// Records a variable write.
    #[must_use]
    pub fn set_variable(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_workflow::TriggerKind;
    use serde_json::json;

    fn execution() -> Execution {
        let trigger = TriggerEvent::new(
            TriggerKind::Webhook,
            "hooks/orders",
            json!({"order": 17}),
        );
        Execution::new(WorkflowId::new(), TenantId::new(), 1, trigger)
    }

    #[test]
    fn new_execution_is_pending_with_empty_context() {
        let exec = execution();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.workflow_version, 1);
        assert!(exec.context.node_outputs.is_empty());
        assert!(exec.started_at.is_none());
        assert_eq!(exec.expires_at - exec.created_at, EXECUTION_RETENTION);
    }

    #[test]
    fn started_update_stamps_started_at_once() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::started()).unwrap();
        let first = exec.started_at.expect("started");

        exec.apply(ExecutionUpdate::started()).unwrap();
        assert_eq!(exec.started_at, Some(first));
    }

    #[test]
    fn node_outcomes_accumulate_across_updates() {
        let mut exec = execution();
        let a = NodeId::new();
        let b = NodeId::new();

        exec.apply(ExecutionUpdate::started().node_completed(a, json!({"rows": 3}), 12))
            .unwrap();
        exec.apply(ExecutionUpdate::default().node_skipped(b))
            .unwrap();

        assert!(exec.completed_nodes.contains(&a));
        assert!(exec.skipped_nodes.contains(&b));
        assert_eq!(exec.context.node_outputs[&a], json!({"rows": 3}));
        assert_eq!(exec.metrics.node_ms[&a], 12);
    }

    #[test]
    fn completion_sets_completed_at_and_total() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::started()).unwrap();
        exec.apply(ExecutionUpdate::completed()).unwrap();

        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());
        assert!(exec.metrics.total_ms >= 0);
    }

    #[test]
    fn failure_carries_structured_detail() {
        let mut exec = execution();
        let node = NodeId::new();
        exec.apply(ExecutionUpdate::started()).unwrap();
        exec.apply(ExecutionUpdate::failed(ExecutionFailure::new(
            Some(node),
            "upstream_timeout",
            "crm did not answer within 30s",
        )))
        .unwrap();

        let failure = exec.failure.expect("failure recorded");
        assert_eq!(failure.node_id, Some(node));
        assert_eq!(failure.code, "upstream_timeout");
    }

    #[test]
    fn terminal_record_rejects_further_updates() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::cancelled()).unwrap();

        let err = exec.apply(ExecutionUpdate::completed()).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::TerminalImmutable {
                execution_id: exec.id,
                status: ExecutionStatus::Cancelled,
            }
        );
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn reopen_resurrects_a_failed_run_but_keeps_the_failure() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::started()).unwrap();
        exec.apply(ExecutionUpdate::failed(ExecutionFailure::new(
            None,
            "upstream_timeout",
            "no answer",
        )))
        .unwrap();

        exec.reopen().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.completed_at.is_none());
        assert!(exec.failure.is_some());
        // And the reopened record accepts updates again.
        exec.apply(ExecutionUpdate::started()).unwrap();
    }

    #[test]
    fn reopen_never_touches_a_completed_run() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::completed()).unwrap();
        assert!(exec.reopen().is_err());
        assert_eq!(exec.status, ExecutionStatus::Completed);
    }

    #[test]
    fn variables_merge_with_later_writes_winning() {
        let mut exec = execution();
        exec.apply(ExecutionUpdate::default().set_variable("region", json!("eu")))
            .unwrap();
        exec.apply(ExecutionUpdate::default().set_variable("region", json!("us")))
            .unwrap();
        assert_eq!(exec.context.variables["region"], json!("us"));
    }
}
