//! Storage traits for workflows and version snapshots.
//!
//! Lib crates are store-agnostic: production uses the Postgres
//! repositories in the server binary, while tests and development use
//! the in-memory implementations here.

use crate::definition::Workflow;
use crate::error::WorkflowError;
use crate::version::{SnapshotPage, WorkflowSnapshot};
use async_trait::async_trait;
use flowline_core::{TenantId, WorkflowId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable storage for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Creates a workflow.
    ///
    /// Fails with `SlugTaken` if the tenant already has a workflow
    /// with the same slug.
    async fn create(&self, workflow: &Workflow) -> Result<(), WorkflowError>;

    /// Fetches a workflow by ID.
    async fn get(&self, id: WorkflowId) -> Result<Workflow, WorkflowError>;

    /// Fetches a workflow by tenant and slug.
    async fn get_by_slug(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<Workflow>, WorkflowError>;

    /// Persists the current state of a workflow.
    async fn update(&self, workflow: &Workflow) -> Result<(), WorkflowError>;

    /// Deletes a workflow. Active workflows are never deleted; pause
    /// or archive first.
    async fn delete(&self, id: WorkflowId) -> Result<(), WorkflowError>;

    /// Lists a tenant's active workflows (for trigger matching).
    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError>;

    /// Lists all of a tenant's workflows.
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError>;
}

/// Append-only storage for version snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the highest version number stored for a workflow.
    async fn latest_version(&self, workflow_id: WorkflowId) -> Result<Option<i64>, WorkflowError>;

    /// Fetches a specific snapshot.
    async fn get(
        &self,
        workflow_id: WorkflowId,
        version: i64,
    ) -> Result<WorkflowSnapshot, WorkflowError>;

    /// Fetches the currently active snapshot, if any.
    async fn active(&self, workflow_id: WorkflowId)
        -> Result<Option<WorkflowSnapshot>, WorkflowError>;

    /// Appends a new active snapshot, demoting the previously active
    /// one in the same operation. The snapshot's version must be
    /// greater than any stored version.
    async fn append_active(&self, snapshot: WorkflowSnapshot) -> Result<(), WorkflowError>;

    /// Lists snapshots newest-first with pagination.
    async fn list(
        &self,
        workflow_id: WorkflowId,
        page: u32,
        per_page: u32,
    ) -> Result<SnapshotPage, WorkflowError>;
}

/// In-memory workflow store backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: Mutex<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.lock().expect("workflow store poisoned");
        let slug_taken = workflows
            .values()
            .any(|w| w.tenant_id == workflow.tenant_id && w.slug == workflow.slug);
        if slug_taken {
            return Err(WorkflowError::SlugTaken {
                slug: workflow.slug.clone(),
            });
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> Result<Workflow, WorkflowError> {
        self.workflows
            .lock()
            .expect("workflow store poisoned")
            .get(&id)
            .cloned()
            .ok_or(WorkflowError::NotFound { workflow_id: id })
    }

    async fn get_by_slug(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<Workflow>, WorkflowError> {
        Ok(self
            .workflows
            .lock()
            .expect("workflow store poisoned")
            .values()
            .find(|w| w.tenant_id == tenant_id && w.slug == slug)
            .cloned())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.lock().expect("workflow store poisoned");
        if !workflows.contains_key(&workflow.id) {
            return Err(WorkflowError::NotFound {
                workflow_id: workflow.id,
            });
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete(&self, id: WorkflowId) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.lock().expect("workflow store poisoned");
        let workflow = workflows
            .get(&id)
            .ok_or(WorkflowError::NotFound { workflow_id: id })?;
        if !workflow.status.is_deletable() {
            return Err(WorkflowError::DeleteWhileActive { workflow_id: id });
        }
        workflows.remove(&id);
        Ok(())
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self
            .workflows
            .lock()
            .expect("workflow store poisoned")
            .values()
            .filter(|w| {
                w.tenant_id == tenant_id && w.status == crate::definition::WorkflowStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .lock()
            .expect("workflow store poisoned")
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.id);
        Ok(workflows)
    }
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<Vec<WorkflowSnapshot>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn latest_version(&self, workflow_id: WorkflowId) -> Result<Option<i64>, WorkflowError> {
        Ok(self
            .snapshots
            .lock()
            .expect("snapshot store poisoned")
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .map(|s| s.version)
            .max())
    }

    async fn get(
        &self,
        workflow_id: WorkflowId,
        version: i64,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        self.snapshots
            .lock()
            .expect("snapshot store poisoned")
            .iter()
            .find(|s| s.workflow_id == workflow_id && s.version == version)
            .cloned()
            .ok_or(WorkflowError::VersionNotFound {
                workflow_id,
                version,
            })
    }

    async fn active(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowSnapshot>, WorkflowError> {
        Ok(self
            .snapshots
            .lock()
            .expect("snapshot store poisoned")
            .iter()
            .find(|s| s.workflow_id == workflow_id && s.is_active)
            .cloned())
    }

    async fn append_active(&self, snapshot: WorkflowSnapshot) -> Result<(), WorkflowError> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store poisoned");
        let stale = snapshots
            .iter()
            .filter(|s| s.workflow_id == snapshot.workflow_id)
            .any(|s| s.version >= snapshot.version);
        if stale {
            return Err(WorkflowError::Store {
                message: format!(
                    "snapshot version {} is not newer than stored history",
                    snapshot.version
                ),
            });
        }
        for existing in snapshots
            .iter_mut()
            .filter(|s| s.workflow_id == snapshot.workflow_id && s.is_active)
        {
            existing.deprecate();
        }
        snapshots.push(snapshot);
        Ok(())
    }

    async fn list(
        &self,
        workflow_id: WorkflowId,
        page: u32,
        per_page: u32,
    ) -> Result<SnapshotPage, WorkflowError> {
        let snapshots = self.snapshots.lock().expect("snapshot store poisoned");
        let mut matching: Vec<WorkflowSnapshot> = snapshots
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse(s.version));

        let total = matching.len() as u64;
        let start = (page as usize).saturating_mul(per_page as usize);
        let snapshots = matching
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect();

        Ok(SnapshotPage {
            snapshots,
            page,
            per_page,
            total,
        })
    }
}
