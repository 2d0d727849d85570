//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All state sits behind one `std::sync::Mutex`, so every trait method is
//! trivially atomic: multi-row writes either fully apply or return an
//! error before touching anything.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::lifecycle;
use crate::models::{
    Conversation, Document, DocumentFilter, Message, NotificationRecord, Task,
    TaskStatus, User, UserSettings,
};

use super::{DueReminder, Store, TaskEdit};

#[derive(Default)]
struct State {
    users: HashMap<String, (User, String)>,
    settings: HashMap<String, UserSettings>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    documents: HashMap<String, Document>,
    tasks: HashMap<String, Task>,
    claims: HashMap<String, DateTime<Utc>>,
    attempts: HashMap<String, u64>,
    notifications: Vec<NotificationRecord>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn matches_filter(doc: &Document, filter: &DocumentFilter) -> bool {
    if let Some(q) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let q = q.to_lowercase();
        let hit = doc.title.to_lowercase().contains(&q)
            || doc.content.to_lowercase().contains(&q)
            || doc
                .summary
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&q));
        if !hit {
            return false;
        }
    }
    filter.tags.iter().all(|t| doc.tags.contains(t))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()> {
        let mut s = self.lock()?;
        if s.users.values().any(|(u, _)| u.username == user.username) {
            bail!("username already taken: {}", user.username);
        }
        s.users
            .insert(user.id.clone(), (user.clone(), password_hash.to_string()));
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(id).map(|(u, _)| u.clone()))
    }

    async fn find_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|(u, _)| u.username == username)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<bool> {
        let mut s = self.lock()?;
        if s
            .users
            .values()
            .any(|(u, _)| u.username == user.username && u.id != user.id)
        {
            bail!("username already taken: {}", user.username);
        }
        match s.users.get_mut(&user.id) {
            Some((existing, _)) => {
                *existing = user.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        match self.lock()?.users.get_mut(user_id) {
            Some((_, hash)) => {
                *hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        Ok(self
            .lock()?
            .settings
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserSettings::defaults_for(user_id)))
    }

    async fn put_settings(&self, settings: &UserSettings) -> Result<()> {
        self.lock()?
            .settings
            .insert(settings.user_id.clone(), settings.clone());
        Ok(())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.lock()?
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.lock()?.conversations.get(id).cloned())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let mut out: Vec<Conversation> = self
            .lock()?
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn rename_conversation(
        &self,
        id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.conversations.get_mut(id) {
            Some(c) => {
                c.title = title.to_string();
                c.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut s = self.lock()?;
        s.messages.retain(|m| m.conversation_id != id);
        Ok(s.conversations.remove(id).is_some())
    }

    async fn append_message(&self, message: &Message) -> Result<()> {
        let mut s = self.lock()?;
        let conversation = s
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| anyhow!("conversation not found: {}", message.conversation_id))?;
        conversation.updated_at = message.created_at;
        s.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut out: Vec<Message> = self
            .lock()?
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let mut s = self.lock()?;
        let before = s.messages.len();
        s.messages
            .retain(|m| !(m.id == message_id && m.conversation_id == conversation_id));
        Ok(s.messages.len() < before)
    }

    async fn create_document(&self, doc: &Document, linked_task: Option<&Task>) -> Result<()> {
        let mut s = self.lock()?;
        if s.documents.contains_key(&doc.id) {
            bail!("document already exists: {}", doc.id);
        }
        if let Some(task) = linked_task {
            if s.tasks.contains_key(&task.id) {
                bail!("task already exists: {}", task.id);
            }
        }
        s.documents.insert(doc.id.clone(), doc.clone());
        if let Some(task) = linked_task {
            s.tasks.insert(task.id.clone(), task.clone());
        }
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.lock()?.documents.get(id).cloned())
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let mut out: Vec<Document> = self
            .lock()?
            .documents
            .values()
            .filter(|d| d.owner_id == owner_id && matches_filter(d, filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn update_document(&self, doc: &Document) -> Result<bool> {
        let mut s = self.lock()?;
        match s.documents.get_mut(&doc.id) {
            Some(existing) => {
                *existing = doc.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.documents.remove(id).is_some())
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut s = self.lock()?;
        if s.tasks.contains_key(&task.id) {
            bail!("task already exists: {}", task.id);
        }
        s.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, owner_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut out: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.owner_id == owner_id && status.map_or(true, |st| t.status == st))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(out)
    }

    async fn edit_task(&self, id: &str, edit: &TaskEdit) -> Result<bool> {
        let mut s = self.lock()?;
        let Some(task) = s.tasks.get_mut(id) else {
            return Ok(false);
        };
        task.title = edit.title.clone();
        task.description = edit.description.clone();
        task.due_at = edit.due_at;
        task.reminder_enabled = edit.reminder_enabled;
        task.reminder_address = edit.reminder_address.clone();
        task.updated_at = edit.updated_at;
        if edit.rearm {
            task.notified = false;
            s.attempts.remove(id);
        }
        Ok(true)
    }

    async fn set_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.tasks.get_mut(id) {
            Some(task) if task.status == from => {
                task.status = to;
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let mut s = self.lock()?;
        s.notifications.retain(|n| n.task_id != id);
        s.claims.remove(id);
        s.attempts.remove(id);
        Ok(s.tasks.remove(id).is_some())
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        let s = self.lock()?;
        Ok(s.tasks
            .values()
            .filter(|t| lifecycle::is_reminder_due(t, now))
            .map(|t| DueReminder {
                task: t.clone(),
                owner_email: s.users.get(&t.owner_id).and_then(|(u, _)| u.email.clone()),
            })
            .collect())
    }

    async fn claim_reminder(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        let claimable = s.tasks.get(task_id).is_some_and(|t| !t.notified)
            && s.claims.get(task_id).map_or(true, |until| *until < now);
        if claimable {
            s.claims.insert(task_id.to_string(), lease_until);
        }
        Ok(claimable)
    }

    async fn complete_reminder(&self, record: &NotificationRecord) -> Result<()> {
        let mut s = self.lock()?;
        let task = s
            .tasks
            .get_mut(&record.task_id)
            .ok_or_else(|| anyhow!("task not found: {}", record.task_id))?;
        task.notified = true;
        s.claims.remove(&record.task_id);
        s.notifications.push(record.clone());
        Ok(())
    }

    async fn fail_reminder(&self, record: &NotificationRecord) -> Result<()> {
        let mut s = self.lock()?;
        if !s.tasks.contains_key(&record.task_id) {
            bail!("task not found: {}", record.task_id);
        }
        s.claims.remove(&record.task_id);
        *s.attempts.entry(record.task_id.clone()).or_insert(0) += 1;
        s.notifications.push(record.clone());
        Ok(())
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut s = self.lock()?;
        let mut changed = 0;
        for task in s.tasks.values_mut() {
            if lifecycle::is_overdue(task, now) {
                task.status = TaskStatus::Overdue;
                task.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn failed_attempts(&self, task_id: &str) -> Result<u64> {
        Ok(self.lock()?.attempts.get(task_id).copied().unwrap_or(0))
    }

    async fn list_notifications(
        &self,
        owner_id: &str,
        task_id: Option<&str>,
    ) -> Result<Vec<NotificationRecord>> {
        let s = self.lock()?;
        Ok(s.notifications
            .iter()
            .rev()
            .filter(|n| task_id.map_or(true, |id| n.task_id == id))
            .filter(|n| s.tasks.get(&n.task_id).is_some_and(|t| t.owner_id == owner_id))
            .cloned()
            .collect())
    }
}
