//! Core data models used throughout MindFlow.
//!
//! Every [`Task`], [`Conversation`] and [`Document`] is owned by exactly
//! one [`User`]. Identifiers are UUID strings; timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generates a fresh UUID string for a new entity.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Account email. Reminders fall back to it when a task has no
    /// explicit reminder address.
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    /// Default reminder address for tasks created by the organize pipeline.
    pub default_email: Option<String>,
    /// Default for `reminder_enabled` on new tasks.
    pub reminder_enabled: bool,
    /// Preferred chat model; `None` uses the configured default.
    pub default_model: Option<String>,
}

impl UserSettings {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            default_email: None,
            reminder_enabled: true,
            default_model: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Overdue,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

/// A deadline with an optional email reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub reminder_enabled: bool,
    pub reminder_address: Option<String>,
    /// Document this task was derived from, if created by organize.
    pub source_document_id: Option<String>,
    /// Set once a reminder has been delivered; never reset by the scheduler.
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A new pending, not-yet-notified task.
    pub fn new(owner_id: &str, title: &str, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            description: None,
            due_at,
            status: TaskStatus::Pending,
            reminder_enabled: true,
            reminder_address: None,
            source_document_id: None,
            notified: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit entry for one reminder dispatch attempt. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub task_id: String,
    pub recipient: String,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn sent(task_id: &str, recipient: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.to_string(),
            recipient: recipient.to_string(),
            status: NotificationStatus::Sent,
            sent_at: Some(now),
            error: None,
            created_at: now,
        }
    }

    pub fn failed(task_id: &str, recipient: &str, error: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.to_string(),
            recipient: recipient.to_string(),
            status: NotificationStatus::Failed,
            sent_at: None,
            error: Some(error.to_string()),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One turn of a conversation. Creation order defines the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, role: Role, content: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        }
    }
}

/// A role-tagged message sent to the generative text service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

/// A generated or hand-written document with its tag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub source_conversation_id: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for document listing and search.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Case-insensitive substring over title, content and summary.
    pub query: Option<String>,
    /// Every listed tag must be present on the document.
    pub tags: Vec<String>,
}
