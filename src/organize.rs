//! Conversation to document pipeline.
//!
//! [`OrganizePipeline::organize`] turns a transcript into a stored
//! document, and optionally a task linked to it:
//!
//! ```text
//! transcript ─▶ summary ─▶ document body ─▶ tags ─▶ create_document(doc, task?)
//!   (tail)     (skipped if    (full            (degrade
//!               supplied)      transcript)      to none)
//! ```
//!
//! Summary and body failures fail the call. A tag failure leaves the tag
//! set empty and is listed in `degraded`. Nothing is written until every
//! generation step is done, and the write itself is one transaction, so a
//! failed call never leaves a partial document or task behind.
//!
//! [`OrganizePipeline::suggest`] is the read-only preview: summary, tags,
//! a suggested title and key points.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mindflow_core::lifecycle;
use mindflow_core::models::{new_id, Document, Message, Task};
use mindflow_core::store::Store;

use crate::assistant::Assistant;
use crate::error::{owned, ServiceError, ServiceResult};

/// Parameters for the task created alongside a document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskConfig {
    pub due_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub reminder_enabled: bool,
    /// Falls back to the user's default email when absent.
    #[serde(default)]
    pub reminder_address: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrganizeRequest {
    pub conversation_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub create_task: bool,
    #[serde(default)]
    pub task: Option<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizeOutcome {
    pub document_id: String,
    pub task_id: Option<String>,
    /// Steps that failed and were replaced by an empty value.
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestions {
    pub summary: String,
    pub suggested_title: String,
    pub key_points: Vec<String>,
    pub suggested_tags: Vec<String>,
    pub degraded: Vec<String>,
}

pub struct OrganizePipeline {
    store: Arc<dyn Store>,
    assistant: Assistant,
}

impl OrganizePipeline {
    pub fn new(store: Arc<dyn Store>, assistant: Assistant) -> Self {
        Self { store, assistant }
    }

    /// Owned, non-empty transcript of a conversation.
    async fn transcript(&self, owner_id: &str, conversation_id: &str) -> ServiceResult<Vec<Message>> {
        owned(
            self.store.get_conversation(conversation_id).await?,
            |c| c.owner_id.as_str(),
            owner_id,
            "conversation",
        )?;
        let messages = self.store.list_messages(conversation_id).await?;
        if messages.is_empty() {
            return Err(ServiceError::invalid("conversation has no messages"));
        }
        Ok(messages)
    }

    pub async fn organize(
        &self,
        owner_id: &str,
        request: &OrganizeRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<OrganizeOutcome> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(ServiceError::invalid("title must not be empty"));
        }
        let task_config = match (request.create_task, &request.task) {
            (true, None) => {
                return Err(ServiceError::invalid(
                    "create_task requires a task configuration",
                ))
            }
            (true, Some(config)) => Some(config),
            (false, _) => None,
        };

        let messages = self.transcript(owner_id, &request.conversation_id).await?;
        let settings = self.store.get_settings(owner_id).await?;
        let model = settings.default_model.as_deref();
        let mut degraded = Vec::new();

        let summary = match request
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(supplied) => supplied.to_string(),
            None => self
                .assistant
                .summarize(&messages, model)
                .await
                .map_err(ServiceError::generation("summary"))?,
        };

        let content = self
            .assistant
            .write_document(&messages, title, model)
            .await
            .map_err(ServiceError::generation("document"))?;

        let tags = match self.assistant.suggest_tags(&content, model).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(conversation_id = %request.conversation_id, error = %e, "tag generation failed; continuing without tags");
                degraded.push("tags".to_string());
                Vec::new()
            }
        };

        let document = Document {
            id: new_id(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            content,
            summary: Some(summary.clone()),
            source_conversation_id: Some(request.conversation_id.clone()),
            tags,
            created_at: now,
            updated_at: now,
        };

        let task = task_config.map(|config| {
            let mut task = Task::new(owner_id, title, config.due_at, now);
            task.description = Some(summary.clone());
            task.reminder_enabled = config.reminder_enabled;
            task.reminder_address = lifecycle::resolve_reminder_address(
                config.reminder_address.as_deref(),
                settings.default_email.as_deref(),
            );
            task.source_document_id = Some(document.id.clone());
            task
        });

        self.store.create_document(&document, task.as_ref()).await?;

        info!(
            document_id = %document.id,
            task_id = task.as_ref().map(|t| t.id.as_str()).unwrap_or("-"),
            tags = document.tags.len(),
            "conversation organized"
        );

        Ok(OrganizeOutcome {
            document_id: document.id,
            task_id: task.map(|t| t.id),
            degraded,
        })
    }

    pub async fn suggest(&self, owner_id: &str, conversation_id: &str) -> ServiceResult<Suggestions> {
        let messages = self.transcript(owner_id, conversation_id).await?;
        let settings = self.store.get_settings(owner_id).await?;
        let model = settings.default_model.as_deref();
        let mut degraded = Vec::new();

        let summary = self
            .assistant
            .summarize(&messages, model)
            .await
            .map_err(ServiceError::generation("summary"))?;

        let (title, key_points, tags) = tokio::join!(
            self.assistant.suggest_title(&summary, model),
            self.assistant.key_points(&summary, model),
            self.assistant.suggest_tags(&summary, model),
        );

        let suggested_title = title.unwrap_or_else(|e| {
            warn!(error = %e, "title suggestion failed");
            degraded.push("title".to_string());
            String::new()
        });
        let key_points = key_points.unwrap_or_else(|e| {
            warn!(error = %e, "key point extraction failed");
            degraded.push("key_points".to_string());
            Vec::new()
        });
        let suggested_tags = tags.unwrap_or_else(|e| {
            warn!(error = %e, "tag suggestion failed");
            degraded.push("tags".to_string());
            Vec::new()
        });

        Ok(Suggestions {
            summary,
            suggested_title,
            key_points,
            suggested_tags,
            degraded,
        })
    }
}
