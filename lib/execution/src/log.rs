//! Per-execution log entries.
//!
//! Workers append structured entries as they run a graph; operators
//! read them back alongside the execution record. Entries are bounded
//! by the same 7-day retention window as jobs.

use chrono::{DateTime, Duration, Utc};
use flowline_core::ExecutionId;
use flowline_workflow::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How long log entries are retained before being purged.
pub const LOG_RETENTION: Duration = Duration::days(7);

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Stable string form used in records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One structured diagnostic event emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// The execution this entry belongs to.
    pub execution_id: ExecutionId,
    /// The node being executed, when the entry is node-scoped.
    pub node_id: Option<NodeId>,
    /// When the entry was emitted.
    pub at: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Short machine-readable event name, e.g. `node_started`.
    pub event: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    pub data: Option<JsonValue>,
    /// When the entry may be purged.
    pub expires_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    /// Creates an entry stamped at the current time.
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        node_id: Option<NodeId>,
        level: LogLevel,
        event: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            node_id,
            at: now,
            level,
            event: event.into(),
            message: message.into(),
            data: None,
            expires_at: now + LOG_RETENTION,
        }
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}
