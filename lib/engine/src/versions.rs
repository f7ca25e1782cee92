//! Version history management: publish, rollback, and history reads.
//!
//! Snapshot versions reuse the workflow's content version counter, so
//! `published_version` and `version` compare directly and history
//! numbers only ever grow. Rollback never rewrites history: it copies
//! the target's graph into a brand-new version and activates that.

use crate::error::EngineError;
use flowline_core::WorkflowId;
use flowline_workflow::{
    SnapshotPage, SnapshotStore, WorkflowError, WorkflowSnapshot, WorkflowStore,
};
use std::sync::Arc;

/// Coordinates workflows and their snapshot history.
pub struct VersionManager {
    workflows: Arc<dyn WorkflowStore>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl VersionManager {
    #[must_use]
    pub fn new(workflows: Arc<dyn WorkflowStore>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            workflows,
            snapshots,
        }
    }

    /// Publishes the workflow's current graph as a new active version.
    ///
    /// The graph is validated first (no cycles, at least one enabled
    /// trigger node): a workflow that could never fire is a
    /// configuration error surfaced here rather than at dispatch time.
    /// On first publish the workflow moves Draft → Active.
    pub async fn publish(
        &self,
        workflow_id: WorkflowId,
        note: Option<String>,
    ) -> Result<WorkflowSnapshot, EngineError> {
        let mut workflow = self.workflows.get(workflow_id).await?;
        workflow.graph.validate().map_err(WorkflowError::from)?;

        let snapshot = WorkflowSnapshot::new(
            workflow_id,
            workflow.version,
            workflow.graph.clone(),
            note,
        );
        self.snapshots.append_active(snapshot.clone()).await?;

        workflow.mark_published(snapshot.version);
        self.workflows.update(&workflow).await?;
        tracing::info!(%workflow_id, version = snapshot.version, "workflow published");
        Ok(snapshot)
    }

    /// Rolls back to an earlier version by republishing its graph as a
    /// new version.
    ///
    /// Rolling back to the currently active version is rejected; the
    /// target snapshot's graph is copied into a new version so the
    /// audit trail stays append-only.
    pub async fn rollback(
        &self,
        workflow_id: WorkflowId,
        target_version: i64,
        note: Option<String>,
    ) -> Result<WorkflowSnapshot, EngineError> {
        if let Some(active) = self.snapshots.active(workflow_id).await? {
            if active.version == target_version {
                return Err(WorkflowError::RollbackToActiveVersion {
                    version: target_version,
                }
                .into());
            }
        }
        let target = self.snapshots.get(workflow_id, target_version).await?;

        let mut workflow = self.workflows.get(workflow_id).await?;
        workflow.set_graph(target.graph.clone());

        let mut snapshot =
            WorkflowSnapshot::new(workflow_id, workflow.version, workflow.graph.clone(), note);
        snapshot.change_summary = Some(format!("rollback to version {target_version}"));
        self.snapshots.append_active(snapshot.clone()).await?;

        workflow.mark_published(snapshot.version);
        self.workflows.update(&workflow).await?;
        tracing::info!(
            %workflow_id,
            version = snapshot.version,
            target_version,
            "workflow rolled back"
        );
        Ok(snapshot)
    }

    /// Reads a page of version history, newest first.
    pub async fn list_history(
        &self,
        workflow_id: WorkflowId,
        page: u32,
        per_page: u32,
    ) -> Result<SnapshotPage, EngineError> {
        Ok(self.snapshots.list(workflow_id, page, per_page).await?)
    }

    /// Reports whether the workflow has edits newer than its published
    /// snapshot.
    pub async fn has_unpublished_changes(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<bool, EngineError> {
        let workflow = self.workflows.get(workflow_id).await?;
        Ok(workflow.has_unpublished_changes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::TenantId;
    use flowline_workflow::{
        InMemorySnapshotStore, InMemoryWorkflowStore, Node, NodeConfig, TriggerConfig, Workflow,
        WorkflowGraph, WorkflowStatus,
    };
    use serde_json::json;

    fn graph_with_data_node(config: serde_json::Value) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        let trigger = graph.add_node(Node::new(
            "start",
            NodeConfig::Trigger(TriggerConfig::Webhook {
                path: "hooks/in".to_string(),
            }),
        ));
        let step = graph.add_node(Node::new("transform", NodeConfig::Data { config }));
        graph.add_edge(trigger, step);
        graph
    }

    struct Fixture {
        workflows: Arc<InMemoryWorkflowStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        manager: VersionManager,
    }

    impl Fixture {
        fn new() -> Self {
            let workflows = Arc::new(InMemoryWorkflowStore::new());
            let snapshots = Arc::new(InMemorySnapshotStore::new());
            let manager = VersionManager::new(workflows.clone(), snapshots.clone());
            Self {
                workflows,
                snapshots,
                manager,
            }
        }

        async fn seed(&self) -> Workflow {
            let mut workflow = Workflow::new(TenantId::new(), "orders", "Order intake");
            workflow.set_graph(graph_with_data_node(json!({"mode": "v1"})));
            self.workflows.create(&workflow).await.unwrap();
            workflow
        }
    }

    #[tokio::test]
    async fn first_publish_activates_draft() {
        let fx = Fixture::new();
        let workflow = fx.seed().await;

        let snapshot = fx.manager.publish(workflow.id, None).await.unwrap();
        assert!(snapshot.is_active);

        let stored = fx.workflows.get(workflow.id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Active);
        assert_eq!(stored.published_version, Some(snapshot.version));
        assert!(!stored.has_unpublished_changes());
    }

    #[tokio::test]
    async fn publish_rejects_graph_without_enabled_trigger() {
        let fx = Fixture::new();
        let mut workflow = Workflow::new(TenantId::new(), "silent", "No triggers");
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::new("lonely", NodeConfig::Data { config: json!({}) }));
        workflow.set_graph(graph);
        fx.workflows.create(&workflow).await.unwrap();

        assert!(fx.manager.publish(workflow.id, None).await.is_err());
        assert!(fx.snapshots.active(workflow.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edits_after_publish_show_as_unpublished() {
        let fx = Fixture::new();
        let workflow = fx.seed().await;
        fx.manager.publish(workflow.id, None).await.unwrap();

        let mut stored = fx.workflows.get(workflow.id).await.unwrap();
        stored.set_graph(graph_with_data_node(json!({"mode": "v2"})));
        fx.workflows.update(&stored).await.unwrap();

        assert!(fx.manager.has_unpublished_changes(workflow.id).await.unwrap());
    }

    #[tokio::test]
    async fn rollback_creates_new_version_with_old_graph() {
        // Publish v1 content, edit + publish again, then roll back:
        // the rollback lands as a third version carrying the first
        // version's graph, and the intermediate history survives.
        let fx = Fixture::new();
        let workflow = fx.seed().await;
        let first = fx.manager.publish(workflow.id, None).await.unwrap();

        let mut stored = fx.workflows.get(workflow.id).await.unwrap();
        stored.set_graph(graph_with_data_node(json!({"mode": "v2"})));
        fx.workflows.update(&stored).await.unwrap();
        let second = fx.manager.publish(workflow.id, None).await.unwrap();
        assert!(second.version > first.version);

        let third = fx
            .manager
            .rollback(workflow.id, first.version, None)
            .await
            .unwrap();
        assert!(third.version > second.version);
        assert_eq!(third.graph, first.graph);

        let active = fx.snapshots.active(workflow.id).await.unwrap().unwrap();
        assert_eq!(active.version, third.version);

        let history = fx.manager.list_history(workflow.id, 0, 10).await.unwrap();
        assert_eq!(history.total, 3);
        assert_eq!(history.snapshots[0].version, third.version);
    }

    #[tokio::test]
    async fn rollback_to_active_version_is_rejected() {
        let fx = Fixture::new();
        let workflow = fx.seed().await;
        let snapshot = fx.manager.publish(workflow.id, None).await.unwrap();

        let err = fx
            .manager
            .rollback(workflow.id, snapshot.version, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Workflow(WorkflowError::RollbackToActiveVersion {
                version: snapshot.version
            })
        );
    }

    #[tokio::test]
    async fn rollback_to_unknown_version_is_rejected() {
        let fx = Fixture::new();
        let workflow = fx.seed().await;
        fx.manager.publish(workflow.id, None).await.unwrap();

        assert!(fx.manager.rollback(workflow.id, 999, None).await.is_err());
    }
}
