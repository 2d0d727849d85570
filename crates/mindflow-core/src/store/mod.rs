//! Storage abstraction for MindFlow.
//!
//! The [`Store`] trait covers every persistence operation the scheduler,
//! the organize pipeline and the HTTP surface need. Multi-row writes that
//! must be all-or-nothing (document + tags + linked task, task update +
//! notification record) are single trait methods so each backend can run
//! them in one transaction.
//!
//! User edits and scheduler writes touch disjoint task columns: users go
//! through [`edit_task`](Store::edit_task) and
//! [`set_task_status`](Store::set_task_status), the scheduler through the
//! reminder methods. Neither writes back a stale copy of the other's state.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Group | Methods |
//! |-------|---------|
//! | Users | [`create_user`](Store::create_user), [`get_user`](Store::get_user), [`find_user_credentials`](Store::find_user_credentials), [`update_user`](Store::update_user), [`set_password_hash`](Store::set_password_hash), [`get_settings`](Store::get_settings), [`put_settings`](Store::put_settings) |
//! | Conversations | [`create_conversation`](Store::create_conversation), [`get_conversation`](Store::get_conversation), [`list_conversations`](Store::list_conversations), [`rename_conversation`](Store::rename_conversation), [`delete_conversation`](Store::delete_conversation), [`append_message`](Store::append_message), [`list_messages`](Store::list_messages), [`delete_message`](Store::delete_message) |
//! | Documents | [`create_document`](Store::create_document), [`get_document`](Store::get_document), [`list_documents`](Store::list_documents), [`update_document`](Store::update_document), [`delete_document`](Store::delete_document) |
//! | Tasks | [`create_task`](Store::create_task), [`get_task`](Store::get_task), [`list_tasks`](Store::list_tasks), [`edit_task`](Store::edit_task), [`set_task_status`](Store::set_task_status), [`delete_task`](Store::delete_task) |
//! | Reminders | [`due_reminders`](Store::due_reminders), [`claim_reminder`](Store::claim_reminder), [`complete_reminder`](Store::complete_reminder), [`fail_reminder`](Store::fail_reminder), [`mark_overdue`](Store::mark_overdue), [`failed_attempts`](Store::failed_attempts), [`list_notifications`](Store::list_notifications) |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Conversation, Document, DocumentFilter, Message, NotificationRecord, Task, TaskStatus, User,
    UserSettings,
};

/// A task eligible for a reminder, joined with its owner's account email.
#[derive(Debug, Clone)]
pub struct DueReminder {
    pub task: Task,
    pub owner_email: Option<String>,
}

/// The user-owned fields of a task.
///
/// `rearm` clears `notified` and the failed-attempt count so the edited
/// deadline is reminded once more.
#[derive(Debug, Clone)]
pub struct TaskEdit {
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub reminder_enabled: bool,
    pub reminder_address: Option<String>,
    pub rearm: bool,
    pub updated_at: DateTime<Utc>,
}

/// Abstract storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Look up a user and their stored password hash by username.
    async fn find_user_credentials(&self, username: &str) -> Result<Option<(User, String)>>;

    /// Overwrite username and email. Fails if the username is taken.
    async fn update_user(&self, user: &User) -> Result<bool>;

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool>;

    /// Settings for `user_id`, or [`UserSettings::defaults_for`] when none are stored.
    async fn get_settings(&self, user_id: &str) -> Result<UserSettings>;

    async fn put_settings(&self, settings: &UserSettings) -> Result<()>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Conversations of one owner, most recently updated first.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    async fn rename_conversation(&self, id: &str, title: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// Delete a conversation and its messages in one transaction.
    async fn delete_conversation(&self, id: &str) -> Result<bool>;

    /// Append a message and bump the conversation's `updated_at`.
    async fn append_message(&self, message: &Message) -> Result<()>;

    /// The transcript, in creation order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Delete one message of `conversation_id`.
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool>;

    /// Insert a document, its tags and an optional linked task as one unit.
    ///
    /// Either everything becomes visible or nothing does.
    async fn create_document(&self, doc: &Document, linked_task: Option<&Task>) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents of one owner matching `filter`, most recently updated first.
    async fn list_documents(&self, owner_id: &str, filter: &DocumentFilter)
        -> Result<Vec<Document>>;

    /// Overwrite a document; its tag set is replaced wholesale.
    async fn update_document(&self, doc: &Document) -> Result<bool>;

    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn create_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Tasks of one owner, earliest deadline first.
    async fn list_tasks(&self, owner_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    /// Write the user-owned fields only; `status`, `notified` and the
    /// dispatch lease are left as stored.
    async fn edit_task(&self, id: &str, edit: &TaskEdit) -> Result<bool>;

    /// Move a task from `from` to `to`. Returns `false` when the stored
    /// status is no longer `from` (or the task is gone).
    async fn set_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete a task and its notification records in one transaction.
    async fn delete_task(&self, id: &str) -> Result<bool>;

    /// Tasks with `due_at <= now`, not completed, reminders enabled and
    /// `notified = false`.
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>>;

    /// Take a dispatch lease on a task.
    ///
    /// Succeeds only while the task is still un-notified and no unexpired
    /// lease is held, so two scheduler instances never both send.
    async fn claim_reminder(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark the record's task notified, release its lease and append the
    /// `sent` record, in one transaction.
    async fn complete_reminder(&self, record: &NotificationRecord) -> Result<()>;

    /// Append the `failed` record, bump the task's failed-attempt count and
    /// release the lease, in one transaction.
    async fn fail_reminder(&self, record: &NotificationRecord) -> Result<()>;

    /// Move every pending task with `due_at < now` to `overdue`.
    ///
    /// Returns the number of tasks changed.
    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Failed attempts since the reminder was last armed. Zero for an
    /// unknown task.
    async fn failed_attempts(&self, task_id: &str) -> Result<u64>;

    /// Notification history for tasks of one owner, newest first.
    async fn list_notifications(
        &self,
        owner_id: &str,
        task_id: Option<&str>,
    ) -> Result<Vec<NotificationRecord>>;
}
