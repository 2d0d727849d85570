//! User-facing task operations.
//!
//! Status changes go through [`lifecycle::transition`] as [`Actor::User`]
//! and land with a compare-and-set on the stored status, so a concurrent
//! scheduler tick is never overwritten. Field edits never write `status`
//! or `notified`; moving a deadline or reminder address re-arms the
//! reminder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use mindflow_core::lifecycle::{self, Actor, TransitionError};
use mindflow_core::models::{Task, TaskStatus};
use mindflow_core::store::{Store, TaskEdit};

use crate::error::{owned, ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub reminder_enabled: bool,
    /// Falls back to the user's default email when absent.
    #[serde(default)]
    pub reminder_address: Option<String>,
    #[serde(default)]
    pub source_document_id: Option<String>,
}

/// Attempts at a status compare-and-set before giving up.
const STATUS_RETRIES: usize = 3;

fn default_true() -> bool {
    true
}

/// Partial update. Absent fields are left as they are; an empty
/// `reminder_address` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
    pub reminder_enabled: Option<bool>,
    pub reminder_address: Option<String>,
}

pub struct TaskService {
    store: Arc<dyn Store>,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, owner_id: &str, task_id: &str) -> ServiceResult<Task> {
        owned(
            self.store.get_task(task_id).await?,
            |t| t.owner_id.as_str(),
            owner_id,
            "task",
        )
    }

    pub async fn list(
        &self,
        owner_id: &str,
        status: Option<TaskStatus>,
    ) -> ServiceResult<Vec<Task>> {
        Ok(self.store.list_tasks(owner_id, status).await?)
    }

    pub async fn create(
        &self,
        owner_id: &str,
        new: &NewTask,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(ServiceError::invalid("title must not be empty"));
        }
        if let Some(doc_id) = new.source_document_id.as_deref() {
            owned(
                self.store.get_document(doc_id).await?,
                |d| d.owner_id.as_str(),
                owner_id,
                "document",
            )?;
        }
        let settings = self.store.get_settings(owner_id).await?;

        let mut task = Task::new(owner_id, title, new.due_at, now);
        task.description = new.description.clone();
        task.reminder_enabled = new.reminder_enabled;
        task.reminder_address = lifecycle::resolve_reminder_address(
            new.reminder_address.as_deref(),
            settings.default_email.as_deref(),
        );
        task.source_document_id = new.source_document_id.clone();
        self.store.create_task(&task).await?;
        Ok(task)
    }

    pub async fn update(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        let before = self.get(owner_id, task_id).await?;
        let mut task = before.clone();

        if let Some(title) = &patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(ServiceError::invalid("title must not be empty"));
            }
            task.title = title.to_string();
        }
        if let Some(description) = &patch.description {
            task.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
        }
        if let Some(due_at) = patch.due_at {
            task.due_at = due_at;
        }
        if let Some(enabled) = patch.reminder_enabled {
            task.reminder_enabled = enabled;
        }
        if let Some(address) = &patch.reminder_address {
            task.reminder_address = lifecycle::resolve_reminder_address(Some(address), None);
        }
        if let Some(to) = patch.status {
            if !lifecycle::can_transition(before.status, to, Actor::User) {
                return Err(TransitionError {
                    from: before.status,
                    to,
                }
                .into());
            }
        }

        let edit = TaskEdit {
            title: task.title.clone(),
            description: task.description.clone(),
            due_at: task.due_at,
            reminder_enabled: task.reminder_enabled,
            reminder_address: task.reminder_address.clone(),
            rearm: lifecycle::is_rescheduled(&before, &task),
            updated_at: now,
        };
        if !self.store.edit_task(task_id, &edit).await? {
            return Err(ServiceError::NotFound("task"));
        }
        if let Some(status) = patch.status {
            self.change_status(owner_id, task_id, status, now).await?;
        }
        self.get(owner_id, task_id).await
    }

    pub async fn complete(
        &self,
        owner_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Task> {
        self.change_status(owner_id, task_id, TaskStatus::Completed, now)
            .await?;
        self.get(owner_id, task_id).await
    }

    /// Validate against the freshly stored status, then compare-and-set.
    /// Retries when the scheduler moved the task in between.
    async fn change_status(
        &self,
        owner_id: &str,
        task_id: &str,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        for _ in 0..STATUS_RETRIES {
            let mut task = self.get(owner_id, task_id).await?;
            let from = task.status;
            lifecycle::transition(&mut task, to, Actor::User, now)?;
            if from == to
                || self
                    .store
                    .set_task_status(task_id, from, to, now)
                    .await?
            {
                return Ok(());
            }
        }
        Err(ServiceError::invalid(
            "task changed while updating its status; try again",
        ))
    }

    pub async fn delete(&self, owner_id: &str, task_id: &str) -> ServiceResult<()> {
        self.get(owner_id, task_id).await?;
        self.store.delete_task(task_id).await?;
        Ok(())
    }
}
