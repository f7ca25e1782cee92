//! Workflow graph data model.
//!
//! The graph is stored as plain node/edge lists (serialized to JSONB in
//! the database). Node execution semantics are opaque to this crate:
//! the engine hands whole graphs to an external runner. Validation
//! builds a petgraph `DiGraph` to reject cycles at publish time.

use crate::error::GraphError;
use crate::trigger::TriggerConfig;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("node_").unwrap_or(s);
        Ulid::from_str(raw).map(Self)
    }
}

/// Category-specific configuration for a node.
///
/// Only trigger configuration is interpreted by this subsystem (for
/// event matching); the remaining categories are executed as opaque
/// units of work by the external node runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Entry point that initiates execution.
    Trigger(TriggerConfig),
    /// Conditional branches, loops, delays.
    Logic { config: JsonValue },
    /// Data transforms and variable manipulation.
    Data { config: JsonValue },
    /// Calls to external services (email, HTTP, third-party APIs).
    Integration { service: String, config: JsonValue },
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the workflow.
    pub id: NodeId,
    /// Human-readable label.
    pub name: String,
    /// Category-specific configuration.
    pub config: NodeConfig,
    /// Disabled nodes are skipped by matching and execution.
    pub enabled: bool,
}

impl Node {
    /// Creates a new enabled node.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            config,
            enabled: true,
        }
    }

    /// Returns the trigger configuration if this is a trigger node.
    #[must_use]
    pub fn trigger_config(&self) -> Option<&TriggerConfig> {
        match &self.config {
            NodeConfig::Trigger(config) => Some(config),
            _ => None,
        }
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Optional label (e.g. which branch of a conditional).
    pub label: Option<String>,
}

impl GraphEdge {
    /// Creates an unlabeled edge.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            label: None,
        }
    }
}

/// A workflow graph: node and edge lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// All nodes in the workflow.
    pub nodes: Vec<Node>,
    /// Directed edges between nodes.
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Adds an edge between two existing nodes.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) {
        self.edges.push(GraphEdge::new(source, target));
    }

    /// Returns a node by ID.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Iterates over enabled trigger nodes.
    pub fn enabled_triggers(&self) -> impl Iterator<Item = (&Node, &TriggerConfig)> {
        self.nodes
            .iter()
            .filter(|n| n.enabled)
            .filter_map(|n| n.trigger_config().map(|t| (n, t)))
    }

    /// Validates the graph for publishing.
    ///
    /// # Errors
    ///
    /// Returns an error if node IDs are duplicated, an edge references
    /// a missing node, the graph contains a cycle, or no enabled
    /// trigger node exists.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(GraphError::DuplicateNodeId { node_id: node.id });
            }
        }

        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut indices = HashMap::new();
        for node in &self.nodes {
            indices.insert(node.id, graph.add_node(node.id));
        }
        for edge in &self.edges {
            let source = indices
                .get(&edge.source)
                .ok_or(GraphError::EdgeEndpointMissing {
                    node_id: edge.source,
                })?;
            let target = indices
                .get(&edge.target)
                .ok_or(GraphError::EdgeEndpointMissing {
                    node_id: edge.target,
                })?;
            graph.add_edge(*source, *target, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(GraphError::CycleDetected);
        }

        if self.enabled_triggers().next().is_none() {
            return Err(GraphError::NoEnabledTrigger);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_node() -> Node {
        Node::new(
            "On form submit",
            NodeConfig::Trigger(TriggerConfig::FormSubmission {
                form_id: "f1".to_string(),
            }),
        )
    }

    fn data_node(name: &str) -> Node {
        Node::new(
            name,
            NodeConfig::Data {
                config: serde_json::json!({"expr": "$.payload"}),
            },
        )
    }

    #[test]
    fn valid_graph_passes_validation() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let a = graph.add_node(data_node("Extract"));
        let b = graph.add_node(data_node("Store"));
        graph.add_edge(t, a);
        graph.add_edge(a, b);

        assert!(graph.validate().is_ok());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let a = graph.add_node(data_node("A"));
        let b = graph.add_node(data_node("B"));
        graph.add_edge(t, a);
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        assert_eq!(graph.validate(), Err(GraphError::CycleDetected));
    }

    #[test]
    fn edge_to_missing_node_is_rejected() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let ghost = NodeId::new();
        graph.add_edge(t, ghost);

        assert_eq!(
            graph.validate(),
            Err(GraphError::EdgeEndpointMissing { node_id: ghost })
        );
    }

    #[test]
    fn graph_without_enabled_trigger_is_rejected() {
        let mut graph = WorkflowGraph::new();
        let mut node = trigger_node();
        node.enabled = false;
        graph.add_node(node);
        graph.add_node(data_node("Orphan"));

        assert_eq!(graph.validate(), Err(GraphError::NoEnabledTrigger));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let mut graph = WorkflowGraph::new();
        let node = trigger_node();
        let dup = node.clone();
        graph.add_node(node);
        let id = graph.add_node(dup);

        assert_eq!(
            graph.validate(),
            Err(GraphError::DuplicateNodeId { node_id: id })
        );
    }

    #[test]
    fn node_id_parse_roundtrip() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn graph_serde_roundtrip() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let a = graph.add_node(data_node("A"));
        graph.add_edge(t, a);

        let json = serde_json::to_string(&graph).expect("serialize");
        let parsed: WorkflowGraph = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(graph, parsed);
    }
}
