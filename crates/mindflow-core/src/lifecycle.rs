//! Task lifecycle state machine and reminder predicates.
//!
//! ```text
//!   pending ──(user)──────▶ completed
//!      │                        ▲
//!   (scheduler, due_at passed)  │
//!      ▼                        │
//!   overdue ──(user)────────────┘
//! ```
//!
//! `completed` is terminal. The scheduler only ever moves `pending` tasks
//! to `overdue`; users complete tasks from either non-terminal state.
//! Reminders keep being retried for both non-terminal states until one is
//! delivered, since the tick that fails a reminder also marks the task
//! overdue.

use chrono::{DateTime, Utc};

use crate::models::{Task, TaskStatus};

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User,
    Scheduler,
}

/// A rejected status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot move task from {} to {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

impl std::error::Error for TransitionError {}

/// Whether `actor` may move a task from `from` to `to`.
///
/// Same-state "transitions" are accepted as no-ops for non-terminal states.
pub fn can_transition(from: TaskStatus, to: TaskStatus, actor: Actor) -> bool {
    use TaskStatus::*;
    match (from, to, actor) {
        (Pending, Pending, _) | (Overdue, Overdue, _) => true,
        (Pending, Completed, Actor::User) | (Overdue, Completed, Actor::User) => true,
        (Pending, Overdue, Actor::Scheduler) => true,
        (Completed, Completed, Actor::User) => true,
        _ => false,
    }
}

/// Apply a status change to `task`, bumping `updated_at`.
pub fn transition(
    task: &mut Task,
    to: TaskStatus,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if !can_transition(task.status, to, actor) {
        return Err(TransitionError {
            from: task.status,
            to,
        });
    }
    if task.status != to {
        task.status = to;
        task.updated_at = now;
    }
    Ok(())
}

/// A task the scheduler should try to notify on this tick.
pub fn is_reminder_due(task: &Task, now: DateTime<Utc>) -> bool {
    task.status != TaskStatus::Completed
        && task.reminder_enabled
        && !task.notified
        && task.due_at <= now
}

/// A task the scheduler should promote to `overdue` on this tick.
pub fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Pending && task.due_at < now
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Reminder recipient: the task's own address, else the owner's account email.
pub fn resolve_recipient(task: &Task, owner_email: Option<&str>) -> Option<String> {
    non_blank(task.reminder_address.as_deref())
        .or_else(|| non_blank(owner_email))
        .map(str::to_string)
}

/// Reminder address for a newly created task: explicit, else the user's default.
pub fn resolve_reminder_address(
    explicit: Option<&str>,
    user_default: Option<&str>,
) -> Option<String> {
    non_blank(explicit)
        .or_else(|| non_blank(user_default))
        .map(str::to_string)
}

/// Editing the deadline or destination re-arms the reminder.
pub fn is_rescheduled(before: &Task, after: &Task) -> bool {
    before.due_at != after.due_at || before.reminder_address != after.reminder_address
}
