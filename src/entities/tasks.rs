use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::entities::{Record, RecordMeta};
use crate::error::{AppError, Result};
use crate::repositories::validation::{StringLength, Validator};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Back-office work item attached to a booking or tenant
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position: i64,
}

impl Task {
    pub fn new(tenant_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::default(),
            tenant_id,
            title: title.into(),
            description: None,
            status: TaskStatus::default(),
            assignee_id: None,
            due_at: None,
            position: 0,
        }
    }
}

impl Record for Task {
    const ENTITY: &'static str = "Task";
    const TABLE: &'static str = "tasks";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<()> {
        Validator::new()
            .check("title", &StringLength::between(1, 255), self.title.as_str())
            .finish()?;

        if let Some(description) = &self.description {
            if description.len() > 1000 {
                return Err(AppError::validation(
                    "description: Description must be at most 1000 characters",
                ));
            }
        }
        Ok(())
    }
}
