//! Workflow definitions and lifecycle for the flowline engine.
//!
//! This crate provides:
//!
//! - **Definition**: the editable workflow (graph, settings, variables)
//!   with its draft/active/paused/archived lifecycle state machine
//! - **Graph Model**: node/edge data with petgraph-backed validation
//! - **Triggers**: trigger node configuration and event matching
//! - **Versions**: immutable published snapshots supporting rollback
//! - **Storage**: `WorkflowStore` / `SnapshotStore` traits with
//!   in-memory implementations for tests and development

pub mod definition;
pub mod error;
pub mod graph;
pub mod store;
pub mod trigger;
pub mod version;

pub use definition::{Workflow, WorkflowSettings, WorkflowStatus};
pub use error::{GraphError, WorkflowError};
pub use graph::{GraphEdge, Node, NodeConfig, NodeId, WorkflowGraph};
pub use store::{InMemorySnapshotStore, InMemoryWorkflowStore, SnapshotStore, WorkflowStore};
pub use trigger::{find_matching, EventSource, TriggerConfig, TriggerEvent, TriggerKind, TriggerMatch};
pub use version::{SnapshotPage, SnapshotStats, WorkflowSnapshot};
