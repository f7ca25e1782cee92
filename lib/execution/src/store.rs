//! Storage seams for execution records and logs.

use crate::error::ExecutionError;
use crate::log::ExecutionLogEntry;
use crate::record::{Execution, ExecutionUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, WorkflowId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable storage for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new execution record.
    async fn create(&self, execution: Execution) -> Result<(), ExecutionError>;

    /// Fetches an execution by ID.
    async fn get(&self, id: ExecutionId) -> Result<Execution, ExecutionError>;

    /// Applies an update through [`Execution::apply`], persisting the
    /// result. Fails with `TerminalImmutable` for terminal records.
    async fn update(
        &self,
        id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<Execution, ExecutionError>;

    /// Reopens a record for another delivery via
    /// [`Execution::reopen`], persisting the result. Rejected for
    /// completed records.
    async fn reopen(&self, id: ExecutionId) -> Result<Execution, ExecutionError>;

    /// Lists a workflow's executions, newest first.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, ExecutionError>;

    /// Deletes executions whose retention window has elapsed at `now`.
    /// Returns the number purged.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError>;
}

/// Append-only sink for execution log entries.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Appends one entry.
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), ExecutionError>;

    /// Reads an execution's entries in emission order.
    async fn read(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionLogEntry>, ExecutionError>;

    /// Deletes entries whose retention window has elapsed at `now`.
    /// Returns the number purged.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError>;
}

/// Mutex-guarded execution map for tests and single-process use.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: Execution) -> Result<(), ExecutionError> {
        self.executions
            .lock()
            .expect("execution store poisoned")
            .insert(execution.id, execution);
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        self.executions
            .lock()
            .expect("execution store poisoned")
            .get(&id)
            .cloned()
            .ok_or(ExecutionError::NotFound { execution_id: id })
    }

    async fn update(
        &self,
        id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<Execution, ExecutionError> {
        let mut executions = self.executions.lock().expect("execution store poisoned");
        let execution = executions
            .get_mut(&id)
            .ok_or(ExecutionError::NotFound { execution_id: id })?;
        execution.apply(update)?;
        Ok(execution.clone())
    }

    async fn reopen(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        let mut executions = self.executions.lock().expect("execution store poisoned");
        let execution = executions
            .get_mut(&id)
            .ok_or(ExecutionError::NotFound { execution_id: id })?;
        execution.reopen()?;
        Ok(execution.clone())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, ExecutionError> {
        let executions = self.executions.lock().expect("execution store poisoned");
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError> {
        let mut executions = self.executions.lock().expect("execution store poisoned");
        let before = executions.len();
        // In-flight executions are never purged, however old.
        executions.retain(|_, e| !e.status.is_terminal() || e.expires_at > now);
        Ok((before - executions.len()) as u64)
    }
}

/// Mutex-guarded log vector for tests and single-process use.
#[derive(Default)]
pub struct InMemoryLogSink {
    entries: Mutex<Vec<ExecutionLogEntry>>,
}

impl InMemoryLogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), ExecutionError> {
        self.entries.lock().expect("log sink poisoned").push(entry);
        Ok(())
    }

    async fn read(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionLogEntry>, ExecutionError> {
        Ok(self
            .entries
            .lock()
            .expect("log sink poisoned")
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError> {
        let mut entries = self.entries.lock().expect("log sink poisoned");
        let before = entries.len();
        entries.retain(|e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogLevel;
    use crate::record::ExecutionStatus;
    use chrono::Duration;
    use flowline_core::TenantId;
    use flowline_workflow::{TriggerEvent, TriggerKind};
    use serde_json::json;

    fn execution(workflow_id: WorkflowId) -> Execution {
        let trigger = TriggerEvent::new(TriggerKind::Manual, "operator", json!({}));
        Execution::new(workflow_id, TenantId::new(), 1, trigger)
    }

    #[tokio::test]
    async fn update_round_trips_through_apply() {
        let store = InMemoryExecutionStore::new();
        let exec = execution(WorkflowId::new());
        let id = exec.id;
        store.create(exec).await.unwrap();

        let updated = store.update(id, ExecutionUpdate::started()).await.unwrap();
        assert_eq!(updated.status, ExecutionStatus::Running);
        assert_eq!(store.get(id).await.unwrap().status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn update_of_terminal_record_is_rejected_and_unchanged() {
        let store = InMemoryExecutionStore::new();
        let exec = execution(WorkflowId::new());
        let id = exec.id;
        store.create(exec).await.unwrap();
        store.update(id, ExecutionUpdate::cancelled()).await.unwrap();

        assert!(store.update(id, ExecutionUpdate::completed()).await.is_err());
        assert_eq!(
            store.get(id).await.unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn list_is_scoped_and_newest_first() {
        let store = InMemoryExecutionStore::new();
        let workflow_id = WorkflowId::new();

        let mut older = execution(workflow_id);
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = execution(workflow_id);
        store.create(older.clone()).await.unwrap();
        store.create(newer.clone()).await.unwrap();
        store.create(execution(WorkflowId::new())).await.unwrap();

        let listed = store.list_for_workflow(workflow_id, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn purge_keeps_in_flight_executions() {
        let store = InMemoryExecutionStore::new();
        let mut stale_running = execution(WorkflowId::new());
        stale_running.expires_at = Utc::now() - Duration::hours(1);
        let mut stale_done = execution(WorkflowId::new());
        stale_done.status = ExecutionStatus::Completed;
        stale_done.expires_at = Utc::now() - Duration::hours(1);

        let running_id = stale_running.id;
        store.create(stale_running).await.unwrap();
        store.create(stale_done).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.get(running_id).await.is_ok());
    }

    #[tokio::test]
    async fn log_sink_filters_by_execution() {
        let sink = InMemoryLogSink::new();
        let target = ExecutionId::new();

        sink.append(ExecutionLogEntry::new(
            target,
            None,
            LogLevel::Info,
            "run_started",
            "begin",
        ))
        .await
        .unwrap();
        sink.append(ExecutionLogEntry::new(
            ExecutionId::new(),
            None,
            LogLevel::Info,
            "run_started",
            "other run",
        ))
        .await
        .unwrap();

        let entries = sink.read(target).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "run_started");
    }

    #[tokio::test]
    async fn log_purge_respects_expiry() {
        let sink = InMemoryLogSink::new();
        let mut old = ExecutionLogEntry::new(
            ExecutionId::new(),
            None,
            LogLevel::Debug,
            "node_started",
            "old",
        );
        old.expires_at = Utc::now() - Duration::days(1);
        sink.append(old).await.unwrap();

        assert_eq!(sink.purge_expired(Utc::now()).await.unwrap(), 1);
    }
}
