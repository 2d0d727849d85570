//! Test doubles shared by the integration tests.
//!
//! `ScriptedGenerator` answers by looking at the system prompt, so each
//! generation helper can be scripted (or failed) on its own.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mindflow::config::OrganizeConfig;
use mindflow::llm::{GenerationError, GenerationOptions, TextGenerator, TextStream};
use mindflow::models::{
    ChatMessage, Conversation, Document, DocumentFilter, Message, NotificationRecord, Role, Task,
    TaskStatus, User, UserSettings,
};
use mindflow::notify::{Notifier, NotifyError, OutgoingMail};
use mindflow::store::memory::InMemoryStore;
use mindflow::store::{DueReminder, Store, TaskEdit};

// ─── Scripted generator ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Summary,
    Document,
    Tags,
    Title,
    KeyPoints,
    Chat,
}

fn step_for(messages: &[ChatMessage]) -> Step {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    if system.contains("note-taking") {
        Step::Summary
    } else if system.contains("technical writer") {
        Step::Document
    } else if system.contains("You suggest tags") {
        Step::Tags
    } else if system.contains("You write titles") {
        Step::Title
    } else if system.contains("You extract key points") {
        Step::KeyPoints
    } else {
        Step::Chat
    }
}

pub const DOCUMENT_BODY: &str = "# Launch plan\n\n## Overview\nShip the beta.\n\n\
## Main Content\n- freeze scope\n- write release notes\n\n\
## Conclusion\nRelease on Friday.\n\n## Notes\nNone.";

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedGenerator {
    replies: Mutex<HashMap<Step, Result<String, GenerationError>>>,
    stream_chunks: Mutex<Vec<Result<String, GenerationError>>>,
    /// Keep the stream open after the scripted chunks instead of ending it.
    stream_hangs: AtomicBool,
    upstream_dropped: Arc<AtomicBool>,
    calls: Mutex<Vec<(Step, Option<String>)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        let replies = HashMap::from([
            (Step::Summary, Ok("Team agreed to ship the beta on Friday.".to_string())),
            (Step::Document, Ok(DOCUMENT_BODY.to_string())),
            (Step::Tags, Ok("release, planning, beta".to_string())),
            (Step::Title, Ok("\"Beta launch\"".to_string())),
            (
                Step::KeyPoints,
                Ok("1. Freeze scope\n2. Write notes\n- Ship Friday".to_string()),
            ),
            (Step::Chat, Ok("Sure, here is a plan.".to_string())),
        ]);
        Self {
            replies: Mutex::new(replies),
            stream_chunks: Mutex::new(vec![Ok("Hel".to_string()), Ok("lo".to_string())]),
            stream_hangs: AtomicBool::new(false),
            upstream_dropped: Arc::new(AtomicBool::new(false)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(&self, step: Step, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(step, Ok(text.to_string()));
    }

    pub fn fail(&self, step: Step, error: GenerationError) {
        self.replies.lock().unwrap().insert(step, Err(error));
    }

    pub fn script_stream(&self, chunks: Vec<Result<String, GenerationError>>, hang: bool) {
        *self.stream_chunks.lock().unwrap() = chunks;
        self.stream_hangs.store(hang, Ordering::SeqCst);
    }

    pub fn upstream_dropped(&self) -> bool {
        self.upstream_dropped.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Step> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    /// Model requested by each call, in call order.
    pub fn models(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let step = step_for(messages);
        self.calls
            .lock()
            .unwrap()
            .push((step, options.model.clone()));
        self.replies
            .lock()
            .unwrap()
            .get(&step)
            .cloned()
            .unwrap_or(Err(GenerationError::Empty))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((step_for(messages), options.model.clone()));
        let chunks = self.stream_chunks.lock().unwrap().clone();
        let hang = self.stream_hangs.load(Ordering::SeqCst);
        let flag = self.upstream_dropped.clone();
        Ok(Box::pin(async_stream::stream! {
            let _guard = DropFlag(flag);
            for chunk in chunks {
                yield chunk;
            }
            if hang {
                futures_util::future::pending::<()>().await;
            }
        }))
    }
}

pub fn organize_limits() -> OrganizeConfig {
    OrganizeConfig {
        summary_window: 10,
        summary_max_chars: 200,
        tag_input_chars: 1000,
        max_tags: 5,
        max_key_points: 5,
        title_max_chars: 20,
    }
}

// ─── Scripted notifier ──────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedNotifier {
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<OutgoingMail>>,
}

impl ScriptedNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "relay unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub async fn add_user(store: &dyn Store, username: &str, email: Option<&str>) -> User {
    let user = User {
        id: mindflow::models::new_id(),
        username: username.to_string(),
        email: email.map(str::to_string),
        created_at: Utc::now(),
    };
    store.create_user(&user, "sha256$x$y").await.unwrap();
    user
}

pub async fn add_task(store: &dyn Store, owner: &User, due_at: DateTime<Utc>) -> Task {
    let task = Task::new(&owner.id, "Submit report", due_at, Utc::now());
    store.create_task(&task).await.unwrap();
    task
}

/// The user-editable fields of `task` as they stand.
pub fn edit_of(task: &Task, rearm: bool) -> TaskEdit {
    TaskEdit {
        title: task.title.clone(),
        description: task.description.clone(),
        due_at: task.due_at,
        reminder_enabled: task.reminder_enabled,
        reminder_address: task.reminder_address.clone(),
        rearm,
        updated_at: Utc::now(),
    }
}

/// A conversation holding `turns` alternating user/assistant messages.
pub async fn add_conversation(store: &dyn Store, owner: &User, turns: usize) -> Conversation {
    let now = Utc::now();
    let conversation = Conversation {
        id: mindflow::models::new_id(),
        owner_id: owner.id.clone(),
        title: "Planning".to_string(),
        created_at: now,
        updated_at: now,
    };
    store.create_conversation(&conversation).await.unwrap();
    for i in 0..turns {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let at = now + chrono::Duration::milliseconds(i as i64);
        store
            .append_message(&Message::new(&conversation.id, role, &format!("turn {i}"), at))
            .await
            .unwrap();
    }
    conversation
}

// ─── Store with injectable failures ─────────────────────────────────

/// Delegates to an [`InMemoryStore`] but can fail selected writes.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_create_document: AtomicBool,
    pub fail_complete_reminder: AtomicBool,
    /// Delays the next `get_task` by [`SLOW_READ`], then clears itself.
    pub slow_next_get_task: AtomicBool,
}

pub const SLOW_READ: Duration = Duration::from_millis(200);

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(anyhow!("injected failure: {what}"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()> {
        self.inner.create_user(user, password_hash).await
    }
    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }
    async fn find_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        self.inner.find_user_credentials(username).await
    }
    async fn update_user(&self, user: &User) -> Result<bool> {
        self.inner.update_user(user).await
    }
    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        self.inner.set_password_hash(user_id, password_hash).await
    }
    async fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        self.inner.get_settings(user_id).await
    }
    async fn put_settings(&self, settings: &UserSettings) -> Result<()> {
        self.inner.put_settings(settings).await
    }
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.inner.create_conversation(conversation).await
    }
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.inner.get_conversation(id).await
    }
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        self.inner.list_conversations(owner_id).await
    }
    async fn rename_conversation(
        &self,
        id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.rename_conversation(id, title, now).await
    }
    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.inner.delete_conversation(id).await
    }
    async fn append_message(&self, message: &Message) -> Result<()> {
        self.inner.append_message(message).await
    }
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.inner.list_messages(conversation_id).await
    }
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        self.inner.delete_message(conversation_id, message_id).await
    }
    async fn create_document(&self, doc: &Document, linked_task: Option<&Task>) -> Result<()> {
        Self::check(&self.fail_create_document, "create_document")?;
        self.inner.create_document(doc, linked_task).await
    }
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }
    async fn list_documents(
        &self,
        owner_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        self.inner.list_documents(owner_id, filter).await
    }
    async fn update_document(&self, doc: &Document) -> Result<bool> {
        self.inner.update_document(doc).await
    }
    async fn delete_document(&self, id: &str) -> Result<bool> {
        self.inner.delete_document(id).await
    }
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.inner.create_task(task).await
    }
    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let task = self.inner.get_task(id).await;
        if self.slow_next_get_task.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(SLOW_READ).await;
        }
        task
    }
    async fn list_tasks(&self, owner_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.inner.list_tasks(owner_id, status).await
    }
    async fn edit_task(&self, id: &str, edit: &TaskEdit) -> Result<bool> {
        self.inner.edit_task(id, edit).await
    }
    async fn set_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.set_task_status(id, from, to, now).await
    }
    async fn delete_task(&self, id: &str) -> Result<bool> {
        self.inner.delete_task(id).await
    }
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        self.inner.due_reminders(now).await
    }
    async fn claim_reminder(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.claim_reminder(task_id, now, lease_until).await
    }
    async fn complete_reminder(&self, record: &NotificationRecord) -> Result<()> {
        Self::check(&self.fail_complete_reminder, "complete_reminder")?;
        self.inner.complete_reminder(record).await
    }
    async fn fail_reminder(&self, record: &NotificationRecord) -> Result<()> {
        self.inner.fail_reminder(record).await
    }
    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.mark_overdue(now).await
    }
    async fn failed_attempts(&self, task_id: &str) -> Result<u64> {
        self.inner.failed_attempts(task_id).await
    }
    async fn list_notifications(
        &self,
        owner_id: &str,
        task_id: Option<&str>,
    ) -> Result<Vec<NotificationRecord>> {
        self.inner.list_notifications(owner_id, task_id).await
    }
}
