//! Immutable version snapshots of published workflows.
//!
//! History is append-only: publish creates the next version number and
//! rollback copies an old snapshot's content forward into a new one.
//! Exactly one snapshot per workflow is active at a time.

use crate::graph::WorkflowGraph;
use chrono::{DateTime, Utc};
use flowline_core::WorkflowId;
use serde::{Deserialize, Serialize};

/// Aggregate statistics captured at publish time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Number of nodes in the published graph.
    pub node_count: u32,
    /// Number of edges in the published graph.
    pub edge_count: u32,
    /// Number of enabled trigger nodes.
    pub trigger_count: u32,
}

impl SnapshotStats {
    /// Computes stats for a graph.
    #[must_use]
    pub fn for_graph(graph: &WorkflowGraph) -> Self {
        Self {
            node_count: graph.node_count() as u32,
            edge_count: graph.edge_count() as u32,
            trigger_count: graph.enabled_triggers().count() as u32,
        }
    }
}

/// An immutable record of a published workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// The workflow this snapshot belongs to.
    pub workflow_id: WorkflowId,
    /// Version number, monotonically increasing per workflow.
    pub version: i64,
    /// Full graph copy at publish time.
    pub graph: WorkflowGraph,
    /// Publish note supplied by the operator.
    pub note: Option<String>,
    /// Human summary of what changed since the previous version.
    pub change_summary: Option<String>,
    /// Aggregate stats at publish time.
    pub stats: SnapshotStats,
    /// Whether this snapshot is the currently active one.
    pub is_active: bool,
    /// When this snapshot stopped being active, if ever.
    pub deprecated_at: Option<DateTime<Utc>>,
    /// When published.
    pub created_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    /// Creates an active snapshot of the given graph.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        version: i64,
        graph: WorkflowGraph,
        note: Option<String>,
    ) -> Self {
        let stats = SnapshotStats::for_graph(&graph);
        Self {
            workflow_id,
            version,
            graph,
            note,
            change_summary: None,
            stats,
            is_active: true,
            deprecated_at: None,
            created_at: Utc::now(),
        }
    }

    /// Marks this snapshot as no longer active.
    pub fn deprecate(&mut self) {
        self.is_active = false;
        self.deprecated_at = Some(Utc::now());
    }
}

/// One page of version history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPage {
    /// Snapshots on this page, ordered by descending version.
    pub snapshots: Vec<WorkflowSnapshot>,
    /// Zero-based page index.
    pub page: u32,
    /// Page size used for the query.
    pub per_page: u32,
    /// Total number of snapshots for the workflow.
    pub total: u64,
}
