//! Workflow definition and lifecycle state machine.
//!
//! A workflow is the editable source of truth for an automation:
//! a node/edge graph plus settings, variables, and lifecycle status.
//! Every content edit bumps the `version` counter; `published_version`
//! is only moved by publish and rollback.

use crate::graph::WorkflowGraph;
use chrono::{DateTime, Utc};
use flowline_core::{TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Lifecycle status of a workflow.
///
/// Transitions: `Draft → Active` (first publish), `Active ⇄ Paused`,
/// `Paused → Archived` (terminal). Deletion is permitted from any
/// status except `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Being edited; never matched against events.
    Draft,
    /// Published and eligible for triggering.
    Active,
    /// Temporarily disabled; can be resumed.
    Paused,
    /// Retired for good.
    Archived,
}

impl WorkflowStatus {
    /// Stable string form used in records and error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    /// Returns true if the transition to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Paused, Self::Archived)
        )
    }

    /// Returns true if a workflow in this status may be deleted.
    #[must_use]
    pub fn is_deletable(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Per-workflow execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Maximum delivery attempts for each job.
    pub max_attempts: i32,
    /// Queue priority for this workflow's jobs (higher runs first).
    pub priority: i32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            priority: 0,
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Human slug, unique per tenant.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// The node/edge graph.
    pub graph: WorkflowGraph,
    /// Execution settings.
    pub settings: WorkflowSettings,
    /// Declared variables with default values.
    pub variables: BTreeMap<String, JsonValue>,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Content version, incremented on every edit.
    pub version: i64,
    /// Version number of the active snapshot, if ever published.
    pub published_version: Option<i64>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a new draft workflow.
    #[must_use]
    pub fn new(tenant_id: TenantId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            tenant_id,
            slug: slug.into(),
            name: name.into(),
            description: None,
            graph: WorkflowGraph::new(),
            settings: WorkflowSettings::default(),
            variables: BTreeMap::new(),
            status: WorkflowStatus::Draft,
            version: 1,
            published_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the graph, bumping the content version.
    pub fn set_graph(&mut self, graph: WorkflowGraph) {
        self.graph = graph;
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Replaces the settings, bumping the content version.
    pub fn set_settings(&mut self, settings: WorkflowSettings) {
        self.settings = settings;
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Declares or updates a variable, bumping the content version.
    pub fn set_variable(&mut self, name: impl Into<String>, default: JsonValue) {
        self.variables.insert(name.into(), default);
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Attempts a lifecycle transition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the move is not allowed by
    /// the state machine.
    pub fn transition(&mut self, next: WorkflowStatus) -> Result<(), crate::WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::WorkflowError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records a publish: pins `published_version` and activates.
    ///
    /// Called by the version manager after the snapshot is stored, so
    /// the invariant that `published_version` references an existing
    /// snapshot holds.
    pub fn mark_published(&mut self, version: i64) {
        self.published_version = Some(version);
        if self.status == WorkflowStatus::Draft {
            self.status = WorkflowStatus::Active;
        }
        self.updated_at = Utc::now();
    }

    /// Reports drift between the draft content and the published snapshot.
    #[must_use]
    pub fn has_unpublished_changes(&self) -> bool {
        match self.published_version {
            Some(published) => self.version > published,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeConfig};
    use crate::trigger::TriggerConfig;

    fn draft() -> Workflow {
        Workflow::new(TenantId::new(), "daily-digest", "Daily digest")
    }

    #[test]
    fn new_workflow_is_draft_at_version_one() {
        let workflow = draft();
        assert_eq!(workflow.status, WorkflowStatus::Draft);
        assert_eq!(workflow.version, 1);
        assert!(workflow.published_version.is_none());
        assert!(workflow.has_unpublished_changes());
    }

    #[test]
    fn editing_bumps_version() {
        let mut workflow = draft();
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::new("Start", NodeConfig::Trigger(TriggerConfig::Manual)));
        workflow.set_graph(graph);
        assert_eq!(workflow.version, 2);

        workflow.set_variable("greeting", serde_json::json!("hello"));
        assert_eq!(workflow.version, 3);
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut workflow = draft();
        workflow.mark_published(1);
        assert_eq!(workflow.status, WorkflowStatus::Active);

        workflow.transition(WorkflowStatus::Paused).expect("pause");
        workflow.transition(WorkflowStatus::Active).expect("resume");
        workflow.transition(WorkflowStatus::Paused).expect("pause again");
        workflow
            .transition(WorkflowStatus::Archived)
            .expect("archive");
    }

    #[test]
    fn archived_is_terminal() {
        let mut workflow = draft();
        workflow.mark_published(1);
        workflow.transition(WorkflowStatus::Paused).expect("pause");
        workflow
            .transition(WorkflowStatus::Archived)
            .expect("archive");

        let err = workflow.transition(WorkflowStatus::Active).unwrap_err();
        assert!(err.to_string().contains("invalid state transition"));
    }

    #[test]
    fn draft_cannot_pause() {
        let mut workflow = draft();
        assert!(workflow.transition(WorkflowStatus::Paused).is_err());
    }

    #[test]
    fn active_cannot_archive_directly() {
        let mut workflow = draft();
        workflow.mark_published(1);
        assert!(workflow.transition(WorkflowStatus::Archived).is_err());
    }

    #[test]
    fn active_workflow_is_not_deletable() {
        let mut workflow = draft();
        assert!(workflow.status.is_deletable());

        workflow.mark_published(1);
        assert!(!workflow.status.is_deletable());

        workflow.transition(WorkflowStatus::Paused).expect("pause");
        assert!(workflow.status.is_deletable());
    }

    #[test]
    fn publish_clears_drift_until_next_edit() {
        let mut workflow = draft();
        workflow.set_variable("x", serde_json::json!(1));
        let version = workflow.version;
        workflow.mark_published(version);
        assert!(!workflow.has_unpublished_changes());

        workflow.set_variable("x", serde_json::json!(2));
        assert!(workflow.has_unpublished_changes());
    }
}
