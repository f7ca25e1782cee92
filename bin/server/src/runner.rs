//! Built-in graph runner.
//!
//! Walks the pinned graph in topological order. Trigger, logic, and
//! data nodes are pure JSON plumbing executed in-process; integration
//! nodes are delegated to registered handlers. An integration node
//! with no registered handler is a permanent failure, since retrying
//! cannot conjure the handler.

use async_trait::async_trait;
use flowline_execution::{ExecutionFailure, ExecutionUpdate};
use flowline_engine::{RunOutcome, RunRequest, RunnerError, WorkflowRunner};
use flowline_workflow::{Node, NodeConfig, NodeId};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Executes one integration node (email, HTTP, third-party APIs).
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    /// Calls the external service with the node config and the input
    /// assembled from upstream node outputs.
    async fn call(
        &self,
        config: &JsonValue,
        input: &JsonValue,
    ) -> Result<JsonValue, IntegrationCallError>;
}

/// A failed integration call, classified for the retry decision.
#[derive(Debug)]
pub struct IntegrationCallError {
    pub retryable: bool,
    pub message: String,
}

impl IntegrationCallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Topological graph walker over the built-in node categories.
#[derive(Default)]
pub struct GraphWalkRunner {
    handlers: HashMap<String, Arc<dyn IntegrationHandler>>,
}

impl GraphWalkRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an integration service name.
    #[must_use]
    pub fn with_handler(
        mut self,
        service: impl Into<String>,
        handler: Arc<dyn IntegrationHandler>,
    ) -> Self {
        self.handlers.insert(service.into(), handler);
        self
    }

    fn execution_order(graph: &flowline_workflow::WorkflowGraph) -> Result<Vec<NodeId>, RunnerError> {
        let mut dag = DiGraph::<NodeId, ()>::new();
        let mut indices = HashMap::new();
        for node in &graph.nodes {
            indices.insert(node.id, dag.add_node(node.id));
        }
        for edge in &graph.edges {
            if let (Some(&s), Some(&t)) = (indices.get(&edge.source), indices.get(&edge.target)) {
                dag.add_edge(s, t, ());
            }
        }
        // Publish validation rejects cycles, so a cycle here means the
        // snapshot is corrupt.
        let order = toposort(&dag, None).map_err(|_| {
            RunnerError::permanent(ExecutionFailure::new(
                None,
                "graph_cycle",
                "snapshot graph contains a cycle",
            ))
        })?;
        Ok(order.into_iter().map(|ix| dag[ix]).collect())
    }

    /// Assembles a node's input from its upstream outputs: `Null` for
    /// sources, the single upstream output, or an array of them.
    fn node_input(
        graph: &flowline_workflow::WorkflowGraph,
        outputs: &HashMap<NodeId, JsonValue>,
        node_id: NodeId,
    ) -> JsonValue {
        let mut inputs: Vec<JsonValue> = graph
            .edges
            .iter()
            .filter(|e| e.target == node_id)
            .filter_map(|e| outputs.get(&e.source).cloned())
            .collect();
        match inputs.len() {
            0 => JsonValue::Null,
            1 => inputs.remove(0),
            _ => JsonValue::Array(inputs),
        }
    }

    async fn run_node(
        &self,
        node: &Node,
        input: JsonValue,
        request: &RunRequest,
        update: &mut ExecutionUpdate,
    ) -> Result<JsonValue, (ExecutionFailure, bool)> {
        match &node.config {
            NodeConfig::Trigger(_) => Ok(request.trigger.payload.clone()),
            NodeConfig::Logic { .. } => Ok(input),
            NodeConfig::Data { config } => {
                // Data nodes may assign variables; the input passes
                // through either way.
                if let Some(assignments) = config.get("assign").and_then(|a| a.as_object()) {
                    for (name, value) in assignments {
                        update.variables.insert(name.clone(), value.clone());
                    }
                }
                Ok(input)
            }
            NodeConfig::Integration { service, config } => {
                let Some(handler) = self.handlers.get(service) else {
                    return Err((
                        ExecutionFailure::new(
                            Some(node.id),
                            "integration_unavailable",
                            format!("no handler registered for service '{service}'"),
                        ),
                        false,
                    ));
                };
                handler.call(config, &input).await.map_err(|e| {
                    (
                        ExecutionFailure::new(
                            Some(node.id),
                            "integration_failed",
                            format!("{service}: {}", e.message),
                        ),
                        e.retryable,
                    )
                })
            }
        }
    }
}

#[async_trait]
impl WorkflowRunner for GraphWalkRunner {
    async fn run(&self, request: RunRequest) -> Result<RunOutcome, RunnerError> {
        let order = Self::execution_order(&request.graph)?;

        let mut update = ExecutionUpdate::default();
        let mut outputs: HashMap<NodeId, JsonValue> = HashMap::new();
        let mut last_output = JsonValue::Null;

        for node_id in order {
            let Some(node) = request.graph.node(node_id) else {
                continue;
            };
            if !node.enabled {
                update = update.node_skipped(node_id);
                continue;
            }

            let input = Self::node_input(&request.graph, &outputs, node_id);
            let started = Instant::now();
            match self.run_node(node, input, &request, &mut update).await {
                Ok(output) => {
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    update = update.node_completed(node_id, output.clone(), elapsed_ms);
                    outputs.insert(node_id, output.clone());
                    last_output = output;
                }
                Err((failure, retryable)) => {
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    update = update.node_failed(node_id, elapsed_ms);
                    let err = if retryable {
                        RunnerError::transient(failure)
                    } else {
                        RunnerError::permanent(failure)
                    };
                    return Err(err.with_partial(update));
                }
            }
        }

        Ok(RunOutcome {
            update,
            output: last_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::{ExecutionId, TenantId};
    use flowline_queue::FailureKind;
    use flowline_workflow::{TriggerConfig, TriggerEvent, TriggerKind, WorkflowGraph};
    use std::collections::BTreeMap;

    fn request(graph: WorkflowGraph) -> RunRequest {
        RunRequest {
            execution_id: ExecutionId::new(),
            tenant_id: TenantId::new(),
            graph,
            trigger: TriggerEvent::new(
                TriggerKind::Manual,
                "wf",
                serde_json::json!({"order": 42}),
            ),
            variables: BTreeMap::new(),
        }
    }

    fn trigger_node() -> Node {
        Node::new("Start", NodeConfig::Trigger(TriggerConfig::Manual))
    }

    #[tokio::test]
    async fn payload_flows_through_the_graph() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let a = graph.add_node(Node::new(
            "Pass",
            NodeConfig::Logic {
                config: serde_json::json!({}),
            },
        ));
        graph.add_edge(t, a);

        let outcome = GraphWalkRunner::new()
            .run(request(graph))
            .await
            .expect("run");
        assert_eq!(outcome.output, serde_json::json!({"order": 42}));
        assert_eq!(outcome.update.completed_nodes.len(), 2);
    }

    #[tokio::test]
    async fn disabled_node_is_skipped() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let mut off = Node::new(
            "Off",
            NodeConfig::Logic {
                config: serde_json::json!({}),
            },
        );
        off.enabled = false;
        let off_id = graph.add_node(off);
        graph.add_edge(t, off_id);

        let outcome = GraphWalkRunner::new()
            .run(request(graph))
            .await
            .expect("run");
        assert_eq!(outcome.update.skipped_nodes, vec![off_id]);
        assert_eq!(outcome.update.completed_nodes, vec![t]);
    }

    #[tokio::test]
    async fn data_node_assigns_variables() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let d = graph.add_node(Node::new(
            "Assign",
            NodeConfig::Data {
                config: serde_json::json!({"assign": {"region": "eu-west"}}),
            },
        ));
        graph.add_edge(t, d);

        let outcome = GraphWalkRunner::new()
            .run(request(graph))
            .await
            .expect("run");
        assert_eq!(
            outcome.update.variables.get("region"),
            Some(&serde_json::json!("eu-west"))
        );
    }

    #[tokio::test]
    async fn unregistered_integration_fails_permanently_with_partial_progress() {
        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let i = graph.add_node(Node::new(
            "Send email",
            NodeConfig::Integration {
                service: "email".to_string(),
                config: serde_json::json!({}),
            },
        ));
        graph.add_edge(t, i);

        let err = GraphWalkRunner::new()
            .run(request(graph))
            .await
            .expect_err("should fail");
        assert_eq!(err.kind, FailureKind::Permanent);
        assert_eq!(err.failure.code, "integration_unavailable");
        let partial = err.partial.expect("partial progress");
        assert_eq!(partial.completed_nodes, vec![t]);
        assert_eq!(partial.failed_nodes, vec![i]);
    }

    #[tokio::test]
    async fn registered_handler_runs_and_transient_errors_are_retryable() {
        struct Flaky;

        #[async_trait]
        impl IntegrationHandler for Flaky {
            async fn call(
                &self,
                _config: &JsonValue,
                _input: &JsonValue,
            ) -> Result<JsonValue, IntegrationCallError> {
                Err(IntegrationCallError::transient("upstream timeout"))
            }
        }

        let mut graph = WorkflowGraph::new();
        let t = graph.add_node(trigger_node());
        let i = graph.add_node(Node::new(
            "Call API",
            NodeConfig::Integration {
                service: "http".to_string(),
                config: serde_json::json!({}),
            },
        ));
        graph.add_edge(t, i);

        let runner = GraphWalkRunner::new().with_handler("http", Arc::new(Flaky));
        let err = runner.run(request(graph)).await.expect_err("should fail");
        assert_eq!(err.kind, FailureKind::Transient);
        assert_eq!(err.failure.code, "integration_failed");
    }
}
