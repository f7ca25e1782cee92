//! Error types for the workflow crate.
//!
//! - `GraphError`: structural problems in a workflow graph
//! - `WorkflowError`: lifecycle, versioning, and storage failures

use crate::graph::NodeId;
use flowline_core::WorkflowId;
use std::fmt;

/// Errors from graph validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share the same ID.
    DuplicateNodeId { node_id: NodeId },
    /// An edge references a node that is not in the graph.
    EdgeEndpointMissing { node_id: NodeId },
    /// Graph contains cycles.
    CycleDetected,
    /// The graph has no enabled trigger node, so it can never fire.
    NoEnabledTrigger,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id: {node_id}")
            }
            Self::EdgeEndpointMissing { node_id } => {
                write!(f, "edge references missing node: {node_id}")
            }
            Self::CycleDetected => write!(f, "graph contains cycles"),
            Self::NoEnabledTrigger => write!(f, "graph has no enabled trigger node"),
        }
    }
}

impl std::error::Error for GraphError {}

/// High-level workflow errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Workflow not found.
    NotFound { workflow_id: WorkflowId },
    /// Another workflow in the tenant already uses this slug.
    SlugTaken { slug: String },
    /// Invalid lifecycle state transition.
    InvalidStateTransition { from: String, to: String },
    /// Workflow is active and cannot be deleted.
    DeleteWhileActive { workflow_id: WorkflowId },
    /// Requested version does not exist in the history.
    VersionNotFound { workflow_id: WorkflowId, version: i64 },
    /// Rollback target is the currently active version.
    RollbackToActiveVersion { version: i64 },
    /// The graph failed validation.
    Graph(GraphError),
    /// Storage backend failure.
    Store { message: String },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::SlugTaken { slug } => {
                write!(f, "workflow slug already in use: {slug}")
            }
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
            Self::DeleteWhileActive { workflow_id } => {
                write!(f, "cannot delete active workflow: {workflow_id}")
            }
            Self::VersionNotFound {
                workflow_id,
                version,
            } => {
                write!(f, "version {version} not found for workflow {workflow_id}")
            }
            Self::RollbackToActiveVersion { version } => {
                write!(f, "cannot roll back to the active version {version}")
            }
            Self::Graph(e) => write!(f, "graph validation failed: {e}"),
            Self::Store { message } => write!(f, "workflow store error: {message}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<GraphError> for WorkflowError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let node_id = NodeId::new();
        let err = GraphError::EdgeEndpointMissing { node_id };
        assert!(err.to_string().contains("missing node"));
    }

    #[test]
    fn workflow_error_display() {
        let workflow_id = WorkflowId::new();
        let err = WorkflowError::NotFound { workflow_id };
        assert!(err.to_string().contains("workflow not found"));
    }

    #[test]
    fn graph_error_wraps_into_workflow_error() {
        let err: WorkflowError = GraphError::CycleDetected.into();
        assert!(err.to_string().contains("cycles"));
    }
}
