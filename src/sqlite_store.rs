//! SQLite-backed [`Store`] implementation.
//!
//! Every multi-row write runs inside one `sqlx` transaction, so a failure
//! part-way leaves nothing visible. Timestamps are unix seconds.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mindflow_core::models::{
    Conversation, Document, DocumentFilter, Message, NotificationRecord, NotificationStatus, Role,
    Task, TaskStatus, User, UserSettings,
};
use mindflow_core::store::{DueReminder, Store, TaskEdit};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_tags(&self, doc_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT tag FROM document_tags WHERE document_id = ? ORDER BY rowid")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("tag")).collect())
    }
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp out of range: {}", secs))
}

const TASK_COLUMNS: &str = "id, owner_id, title, description, due_at, status, reminder_enabled, \
     reminder_address, source_document_id, notified, created_at, updated_at";

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        created_at: from_ts(row.get("created_at"))?,
    })
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        created_at: from_ts(row.get("created_at"))?,
        updated_at: from_ts(row.get("updated_at"))?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: Role::parse(&role).ok_or_else(|| anyhow!("unknown message role: {}", role))?,
        content: row.get("content"),
        created_at: from_ts(row.get("created_at"))?,
    })
}

fn row_to_document(row: &SqliteRow, tags: Vec<String>) -> Result<Document> {
    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        summary: row.get("summary"),
        source_conversation_id: row.get("source_conversation_id"),
        tags,
        created_at: from_ts(row.get("created_at"))?,
        updated_at: from_ts(row.get("updated_at"))?,
    })
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        due_at: from_ts(row.get("due_at"))?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown task status: {}", status))?,
        reminder_enabled: row.get::<i64, _>("reminder_enabled") != 0,
        reminder_address: row.get("reminder_address"),
        source_document_id: row.get("source_document_id"),
        notified: row.get::<i64, _>("notified") != 0,
        created_at: from_ts(row.get("created_at"))?,
        updated_at: from_ts(row.get("updated_at"))?,
    })
}

fn row_to_notification(row: &SqliteRow) -> Result<NotificationRecord> {
    let status: String = row.get("status");
    Ok(NotificationRecord {
        id: row.get("id"),
        task_id: row.get("task_id"),
        recipient: row.get("recipient"),
        status: NotificationStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown notification status: {}", status))?,
        sent_at: row
            .get::<Option<i64>, _>("sent_at")
            .map(from_ts)
            .transpose()?,
        error: row.get("error"),
        created_at: from_ts(row.get("created_at"))?,
    })
}

async fn insert_task<'e, E>(executor: E, task: &Task) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO tasks (id, owner_id, title, description, due_at, status,
                           reminder_enabled, reminder_address, source_document_id,
                           notified, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.id)
    .bind(&task.owner_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(ts(task.due_at))
    .bind(task.status.as_str())
    .bind(task.reminder_enabled as i64)
    .bind(&task.reminder_address)
    .bind(&task.source_document_id)
    .bind(task.notified as i64)
    .bind(ts(task.created_at))
    .bind(ts(task.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_notification<'e, E>(executor: E, record: &NotificationRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO notifications (id, task_id, recipient, status, sent_at, error, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.task_id)
    .bind(&record.recipient)
    .bind(record.status.as_str())
    .bind(record.sent_at.map(ts))
    .bind(&record.error)
    .bind(ts(record.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(password_hash)
        .bind(ts(user.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, email, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some((row_to_user(&row)?, row.get("password_hash")))),
            None => Ok(None),
        }
    }

    async fn update_user(&self, user: &User) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET username = ?, email = ? WHERE id = ?")
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        let row = sqlx::query(
            "SELECT default_email, reminder_enabled, default_model FROM user_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => UserSettings {
                user_id: user_id.to_string(),
                default_email: row.get("default_email"),
                reminder_enabled: row.get::<i64, _>("reminder_enabled") != 0,
                default_model: row.get("default_model"),
            },
            None => UserSettings::defaults_for(user_id),
        })
    }

    async fn put_settings(&self, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, default_email, reminder_enabled, default_model)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                default_email = excluded.default_email,
                reminder_enabled = excluded.reminder_enabled,
                default_model = excluded.default_model
            "#,
        )
        .bind(&settings.user_id)
        .bind(&settings.default_email)
        .bind(settings.reminder_enabled as i64)
        .bind(&settings.default_model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, owner_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(ts(conversation.created_at))
        .bind(ts(conversation.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, title, created_at, updated_at FROM conversations
            WHERE owner_id = ?
            ORDER BY updated_at DESC, rowid DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn rename_conversation(
        &self,
        id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(ts(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(ts(message.created_at))
            .bind(&message.conversation_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(anyhow!(
                "conversation not found: {}",
                message.conversation_id
            ));
        }

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(ts(message.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, created_at FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ? AND conversation_id = ?")
            .bind(message_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_document(&self, doc: &Document, linked_task: Option<&Task>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, title, content, summary,
                                   source_conversation_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.summary)
        .bind(&doc.source_conversation_id)
        .bind(ts(doc.created_at))
        .bind(ts(doc.updated_at))
        .execute(&mut *tx)
        .await?;

        for tag in &doc.tags {
            sqlx::query("INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?, ?)")
                .bind(&doc.id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(task) = linked_task {
            insert_task(&mut *tx, task).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let tags = self.load_tags(id).await?;
                Ok(Some(row_to_document(&row, tags)?))
            }
            None => Ok(None),
        }
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT * FROM documents WHERE owner_id = ?");
        let query = filter
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q.to_lowercase()));
        if query.is_some() {
            sql.push_str(
                " AND (lower(title) LIKE ? OR lower(content) LIKE ? OR lower(coalesce(summary, '')) LIKE ?)",
            );
        }
        for _ in &filter.tags {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM document_tags t WHERE t.document_id = documents.id AND t.tag = ?)",
            );
        }
        sql.push_str(" ORDER BY updated_at DESC, rowid DESC");

        let mut q = sqlx::query(&sql).bind(owner_id);
        if let Some(pattern) = &query {
            q = q.bind(pattern).bind(pattern).bind(pattern);
        }
        for tag in &filter.tags {
            q = q.bind(tag);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let tags = self.load_tags(&id).await?;
            docs.push(row_to_document(row, tags)?);
        }
        Ok(docs)
    }

    async fn update_document(&self, doc: &Document) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE documents SET title = ?, content = ?, summary = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.summary)
        .bind(ts(doc.updated_at))
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM document_tags WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;
        for tag in &doc.tags {
            sqlx::query("INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?, ?)")
                .bind(&doc.id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_tags WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        insert_task(&self.pool, task).await
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn list_tasks(&self, owner_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks WHERE owner_id = ? AND status = ? ORDER BY due_at ASC, rowid ASC",
                    TASK_COLUMNS
                ))
                .bind(owner_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks WHERE owner_id = ? ORDER BY due_at ASC, rowid ASC",
                    TASK_COLUMNS
                ))
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_task).collect()
    }

    async fn edit_task(&self, id: &str, edit: &TaskEdit) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET title = ?, description = ?, due_at = ?, reminder_enabled = ?,
                             reminder_address = ?, updated_at = ?,
                             notified = CASE WHEN ? THEN 0 ELSE notified END,
                             failed_attempts = CASE WHEN ? THEN 0 ELSE failed_attempts END
            WHERE id = ?
            "#,
        )
        .bind(&edit.title)
        .bind(&edit.description)
        .bind(ts(edit.due_at))
        .bind(edit.reminder_enabled as i64)
        .bind(&edit.reminder_address)
        .bind(ts(edit.updated_at))
        .bind(edit.rearm)
        .bind(edit.rearm)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(ts(now))
                .bind(id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM notifications WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.owner_id, t.title, t.description, t.due_at, t.status,
                   t.reminder_enabled, t.reminder_address, t.source_document_id,
                   t.notified, t.created_at, t.updated_at, u.email AS owner_email
            FROM tasks t
            LEFT JOIN users u ON u.id = t.owner_id
            WHERE t.due_at <= ?
              AND t.status IN ('pending', 'overdue')
              AND t.reminder_enabled = 1
              AND t.notified = 0
            "#,
        )
        .bind(ts(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DueReminder {
                    task: row_to_task(row)?,
                    owner_email: row.get("owner_email"),
                })
            })
            .collect()
    }

    async fn claim_reminder(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET claimed_until = ?
            WHERE id = ?
              AND notified = 0
              AND (claimed_until IS NULL OR claimed_until < ?)
            "#,
        )
        .bind(ts(lease_until))
        .bind(task_id)
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_reminder(&self, record: &NotificationRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE tasks SET notified = 1, claimed_until = NULL WHERE id = ?")
                .bind(&record.task_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("task not found: {}", record.task_id));
        }
        insert_notification(&mut *tx, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_reminder(&self, record: &NotificationRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE tasks SET claimed_until = NULL, failed_attempts = failed_attempts + 1 WHERE id = ?",
        )
        .bind(&record.task_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("task not found: {}", record.task_id));
        }
        insert_notification(&mut *tx, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'overdue', updated_at = ? WHERE status = 'pending' AND due_at < ?",
        )
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn failed_attempts(&self, task_id: &str) -> Result<u64> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT failed_attempts FROM tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(count.unwrap_or(0) as u64)
    }

    async fn list_notifications(
        &self,
        owner_id: &str,
        task_id: Option<&str>,
    ) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.task_id, n.recipient, n.status, n.sent_at, n.error, n.created_at
            FROM notifications n
            JOIN tasks t ON t.id = n.task_id
            WHERE t.owner_id = ?
              AND (? IS NULL OR n.task_id = ?)
            ORDER BY n.created_at DESC, n.rowid DESC
            "#,
        )
        .bind(owner_id)
        .bind(task_id)
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }
}
