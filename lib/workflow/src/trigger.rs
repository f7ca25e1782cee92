//! Trigger configuration and event matching.
//!
//! Trigger nodes are entry points in the workflow graph. Matching an
//! inbound event against the active workflows of a tenant is a pure,
//! read-only query: no match is a normal outcome, not an error.

use crate::definition::{Workflow, WorkflowStatus};
use crate::graph::NodeId;
use flowline_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Configuration of a trigger node, stored in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when a specific form is submitted.
    FormSubmission {
        /// Identifier of the form to listen for.
        form_id: String,
    },
    /// Fires on an inbound HTTP webhook.
    Webhook {
        /// The webhook path (e.g. "/hooks/new-lead").
        path: String,
    },
    /// Fires on a cron schedule.
    Schedule {
        /// Cron expression (e.g. "0 7 * * *").
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
    },
    /// Fires when a user starts the workflow by hand.
    Manual,
}

/// The kind of event that initiated (or will initiate) an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A form was submitted.
    FormSubmission,
    /// An HTTP webhook was received.
    Webhook,
    /// A schedule fired.
    Schedule,
    /// A user started the workflow manually.
    Manual,
    /// An operator replayed a past execution's trigger payload.
    Replay,
}

impl TriggerKind {
    /// Stable string form used in records and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormSubmission => "form_submission",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
            Self::Replay => "replay",
        }
    }
}

/// Metadata about where an event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Authenticated caller identity, if known.
    pub caller: Option<String>,
    /// Network origin of the event.
    pub remote_addr: Option<String>,
}

/// An inbound event descriptor.
///
/// `source` identifies the concrete emitter: the form id for form
/// submissions, the path for webhooks, the cron expression for
/// schedules, and the target workflow id for manual starts. Replay
/// events are dispatched directly by the engine and never matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// What kind of event this is.
    pub kind: TriggerKind,
    /// Source identifier, matched structurally against trigger configs.
    pub source: String,
    /// Arbitrary input payload handed to the execution.
    pub payload: JsonValue,
    /// Origin metadata.
    pub meta: EventSource,
}

impl TriggerEvent {
    /// Creates an event with empty origin metadata.
    #[must_use]
    pub fn new(kind: TriggerKind, source: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind,
            source: source.into(),
            payload,
            meta: EventSource::default(),
        }
    }
}

impl TriggerConfig {
    /// Returns true if this trigger configuration matches the event.
    ///
    /// Matching is structural: the trigger type must agree with the
    /// event kind and the configured source identifier must equal the
    /// event source. Manual triggers match when the event source names
    /// the owning workflow.
    #[must_use]
    pub fn matches(&self, event: &TriggerEvent, workflow_id: WorkflowId) -> bool {
        match (self, event.kind) {
            (Self::FormSubmission { form_id }, TriggerKind::FormSubmission) => {
                *form_id == event.source
            }
            (Self::Webhook { path }, TriggerKind::Webhook) => *path == event.source,
            (Self::Schedule { cron, .. }, TriggerKind::Schedule) => *cron == event.source,
            (Self::Manual, TriggerKind::Manual) => workflow_id.to_string() == event.source,
            _ => false,
        }
    }
}

/// A single trigger match: which workflow fired, and through which node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMatch {
    /// The matched workflow.
    pub workflow_id: WorkflowId,
    /// The trigger node that matched.
    pub node_id: NodeId,
}

/// Finds active workflows with an enabled trigger node matching `event`.
///
/// Disabled trigger nodes and non-active workflows are ignored. An
/// empty result is a normal outcome. This holds no locks and has no
/// side effects.
#[must_use]
pub fn find_matching<'a>(
    workflows: impl IntoIterator<Item = &'a Workflow>,
    event: &TriggerEvent,
) -> Vec<TriggerMatch> {
    workflows
        .into_iter()
        .filter(|w| w.status == WorkflowStatus::Active)
        .flat_map(|w| {
            w.graph
                .enabled_triggers()
                .filter(|(_, config)| config.matches(event, w.id))
                .map(|(node, _)| TriggerMatch {
                    workflow_id: w.id,
                    node_id: node.id,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
