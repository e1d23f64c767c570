//! Task repository implementation
//!
//! Tasks are listed by status and moved through their lifecycle with a
//! single-attribute write that bypasses the full-record update path.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::OpContext;
use crate::entities::{Record, Task, TaskStatus};
use crate::error::{AppError, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions, now};
use crate::repositories::pagination::{Page, PageRequest};
use crate::storage::{FieldChange, Filter, OrderDirection, Store, Visibility};

/// Task repository implementation
#[derive(Debug, Clone)]
pub struct TaskRepository {
    /// Base repository
    base: BaseRepository<Task>,
}

impl TaskRepository {
    /// Create a new task repository
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self {
            base: BaseRepository::new(store, options),
        }
    }

    /// Tasks of a tenant in one status, in board order
    #[instrument(skip(self, ctx))]
    pub async fn list_by_status(
        &self,
        ctx: &OpContext,
        tenant_id: Uuid,
        status: TaskStatus,
        page: PageRequest,
    ) -> Result<Page<Task>> {
        let filter = Filter::new()
            .eq("tenant_id", tenant_id.to_string())
            .eq("status", status.as_str())
            .order_by("position", OrderDirection::Asc);
        self.base.list(ctx, filter, page).await
    }

    /// Tasks assigned to one user across statuses
    #[instrument(skip(self, ctx))]
    pub async fn list_by_assignee(
        &self,
        ctx: &OpContext,
        assignee_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Task>> {
        let filter = Filter::new().eq("assignee_id", assignee_id.to_string());
        self.base.list(ctx, filter, page).await
    }

    /// Update task status
    #[instrument(skip(self, ctx))]
    pub async fn update_status(&self, ctx: &OpContext, id: Uuid, status: TaskStatus) -> Result<Task> {
        if id.is_nil() {
            return Err(AppError::validation("Task id must not be empty"));
        }
        debug!("Updating task status: id={}, status={:?}", id, status);

        let changes = [
            FieldChange::attr("status", status.as_str()),
            FieldChange::UpdatedAt(now()),
        ];
        let result = self
            .base
            .run_store(
                ctx,
                "update_status",
                self.base
                    .store()
                    .update_fields(Task::TABLE, id, &changes, Visibility::Visible),
            )
            .await;
        // Bypass write: drop cached snapshots whatever the outcome
        self.base.invalidate(&[id]).await;

        if result? == 0 {
            return Err(AppError::not_found(Task::ENTITY, id));
        }
        self.base
            .audit_action(ctx, "update_status", id, Some(json!({ "status": status })));
        self.base.get_by_id(ctx, id).await
    }

    /// Start task (mark as in progress)
    pub async fn start_task(&self, ctx: &OpContext, id: Uuid) -> Result<Task> {
        self.update_status(ctx, id, TaskStatus::InProgress).await
    }

    /// Complete task
    pub async fn complete_task(&self, ctx: &OpContext, id: Uuid) -> Result<Task> {
        self.update_status(ctx, id, TaskStatus::Completed).await
    }

    /// Fail task
    pub async fn fail_task(&self, ctx: &OpContext, id: Uuid) -> Result<Task> {
        self.update_status(ctx, id, TaskStatus::Failed).await
    }
}

impl Repository<Task> for TaskRepository {
    fn base(&self) -> &BaseRepository<Task> {
        &self.base
    }
}
