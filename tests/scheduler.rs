//! Reminder scheduler behavior against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{add_task, add_user, edit_of, FlakyStore, ScriptedNotifier};
use mindflow::config::SchedulerConfig;
use mindflow::error::ServiceError;
use mindflow::models::{NotificationStatus, TaskStatus};
use mindflow::notify::DisabledNotifier;
use mindflow::scheduler::{DispatchOutcome, ReminderScheduler};
use mindflow::store::memory::InMemoryStore;
use mindflow::store::Store;

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        interval_secs: 1,
        ..SchedulerConfig::default()
    }
}

fn setup() -> (Arc<InMemoryStore>, Arc<ScriptedNotifier>, ReminderScheduler) {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(ScriptedNotifier::new());
    let scheduler = ReminderScheduler::new(store.clone(), notifier.clone(), &scheduler_config());
    (store, notifier, scheduler)
}

// ─── Single tick ────────────────────────────────────────────────────

#[tokio::test]
async fn test_successful_tick_notifies_once() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::minutes(10)).await;

    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored.notified);

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NotificationStatus::Sent);
    assert_eq!(records[0].sent_at, Some(now));
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_recorded_and_retried() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(1)).await;

    notifier.set_failing(true);
    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.failed, 1);

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(!stored.notified);
    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NotificationStatus::Failed);
    assert!(records[0].error.as_deref().unwrap().contains("503"));

    notifier.set_failing(false);
    let later = now + chrono::Duration::minutes(5);
    let report = scheduler.run_tick(later).await.unwrap().unwrap();
    assert_eq!(report.sent, 1);

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored.notified);
    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == NotificationStatus::Sent)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_past_due_task_becomes_overdue_whatever_the_outcome() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let failing = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(2)).await;

    let mut silent = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(3)).await;
    silent.reminder_enabled = false;
    store
        .edit_task(&silent.id, &edit_of(&silent, false))
        .await
        .unwrap();

    let upcoming = add_task(store.as_ref(), &owner, now + chrono::Duration::hours(1)).await;

    notifier.set_failing(true);
    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.overdue, 2);

    for id in [&failing.id, &silent.id] {
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Overdue);
    }
    let upcoming = store.get_task(&upcoming.id).await.unwrap().unwrap();
    assert_eq!(upcoming.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_notified_task_is_never_sent_again() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    // Due exactly now: reminded, but not overdue, so it stays pending.
    let task = add_task(store.as_ref(), &owner, now).await;

    scheduler.run_tick(now).await.unwrap().unwrap();
    for minutes in [0, 5, 10] {
        let report = scheduler
            .run_tick(now + chrono::Duration::minutes(minutes))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.due, 0);
    }

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_overdue_reminder_falls_back_to_account_email() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "ann", Some("a@x.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(1)).await;
    assert!(task.reminder_address.is_none());

    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.sent, 1);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert!(sent[0].subject.contains("Submit report"));

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored.notified);
    assert_eq!(stored.status, TaskStatus::Overdue);

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].recipient, "a@x.com");
    assert_eq!(records[0].status, NotificationStatus::Sent);
}

#[tokio::test]
async fn test_explicit_reminder_address_wins() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "ann", Some("a@x.com")).await;
    let now = Utc::now();
    let mut task = add_task(store.as_ref(), &owner, now).await;
    task.reminder_address = Some("team@x.com".to_string());
    store
        .edit_task(&task.id, &edit_of(&task, true))
        .await
        .unwrap();

    scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(notifier.sent()[0].to, "team@x.com");
}

#[tokio::test]
async fn test_task_without_recipient_is_skipped_without_record() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "ghost", None).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::minutes(1)).await;

    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.skipped, 1);
    assert!(notifier.sent().is_empty());

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert!(records.is_empty());
    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(!stored.notified);
    assert_eq!(stored.status, TaskStatus::Overdue);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_other_tasks() {
    let (store, notifier, scheduler) = setup();
    let with_email = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let without_email = add_user(store.as_ref(), "ghost", None).await;
    let now = Utc::now();
    add_task(store.as_ref(), &without_email, now).await;
    for _ in 0..5 {
        add_task(store.as_ref(), &with_email, now).await;
    }

    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.due, 6);
    assert_eq!(report.sent, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(notifier.sent().len(), 5);
}

// ─── Redesigned behavior ────────────────────────────────────────────

#[tokio::test]
async fn test_max_attempts_stops_retrying() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(ScriptedNotifier::new());
    let config = SchedulerConfig {
        max_attempts: Some(2),
        ..scheduler_config()
    };
    let scheduler = ReminderScheduler::new(store.clone(), notifier.clone(), &config);
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::minutes(1)).await;

    notifier.set_failing(true);
    for i in 0..4 {
        scheduler
            .run_tick(now + chrono::Duration::minutes(i))
            .await
            .unwrap()
            .unwrap();
    }

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let report = scheduler.run_tick(now).await.unwrap().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_claimed_task_is_not_dispatched_twice() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now).await;

    // Another instance holds the lease.
    assert!(store
        .claim_reminder(&task.id, now, now + chrono::Duration::minutes(2))
        .await
        .unwrap());

    let due = store.due_reminders(now).await.unwrap();
    let outcome = scheduler.dispatcher().dispatch(&due[0], now).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Contended);
    assert!(notifier.sent().is_empty());

    // The lease expired; this instance may now send.
    let later = now + chrono::Duration::minutes(3);
    let outcome = scheduler
        .dispatcher()
        .dispatch(&due[0], later)
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
}

#[tokio::test]
async fn test_storage_failure_aborts_tick_before_overdue_step() {
    let store = Arc::new(FlakyStore::new());
    let notifier = Arc::new(ScriptedNotifier::new());
    let scheduler = ReminderScheduler::new(store.clone(), notifier.clone(), &scheduler_config());
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(1)).await;

    store
        .fail_complete_reminder
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(scheduler.run_tick(now).await.is_err());

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(!stored.notified);
    assert_eq!(stored.status, TaskStatus::Pending);
    assert!(scheduler.status().last_report.is_none());

    // The next tick starts over once storage recovers and the lease lapses.
    store
        .fail_complete_reminder
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let report = scheduler
        .run_tick(now + chrono::Duration::minutes(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.overdue, 1);
}

#[tokio::test]
async fn test_disabled_mail_skips_dispatch_but_marks_overdue() {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = ReminderScheduler::new(
        store.clone(),
        Arc::new(DisabledNotifier),
        &scheduler_config(),
    );
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now - chrono::Duration::hours(1)).await;

    for minutes in [0, 5, 10] {
        let report = scheduler
            .run_tick(now + chrono::Duration::minutes(minutes))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent + report.failed, 0);
    }

    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(store.failed_attempts(&task.id).await.unwrap(), 0);

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(!stored.notified);
    assert_eq!(stored.status, TaskStatus::Overdue);
    assert!(scheduler.status().last_report.is_some());

    let err = scheduler
        .dispatcher()
        .send_now(&owner.id, &task.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Notification(_)));
    assert!(store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap()
        .is_empty());
}

// ─── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(ScriptedNotifier::new());
    notifier.set_delay(Duration::from_millis(300));
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        notifier.clone(),
        &scheduler_config(),
    ));
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    add_task(store.as_ref(), &owner, now).await;

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_tick(now).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(scheduler.run_tick(now).await.unwrap().is_none());

    let report = first.await.unwrap().unwrap().unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    add_task(store.as_ref(), &owner, Utc::now() - chrono::Duration::seconds(5)).await;

    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    assert!(scheduler.is_running());
    assert!(!scheduler.start());

    // interval_secs = 1: the first tick fires after one second.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(notifier.sent().len(), 1);
    let status = scheduler.status();
    assert!(status.running);
    assert_eq!(status.interval_secs, 1);
    assert!(status.last_tick_at.is_some());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert!(!scheduler.status().running);

    // Restartable after stop.
    assert!(scheduler.start());
    scheduler.stop().await;
}

// ─── Manual send ────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_now_ignores_due_date() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now + chrono::Duration::days(3)).await;

    let record = scheduler
        .dispatcher()
        .send_now(&owner.id, &task.id, now)
        .await
        .unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(notifier.sent().len(), 1);
    assert!(store.get_task(&task.id).await.unwrap().unwrap().notified);
}

#[tokio::test]
async fn test_send_now_errors() {
    let (store, notifier, scheduler) = setup();
    let owner = add_user(store.as_ref(), "alice", Some("alice@example.com")).await;
    let stranger = add_user(store.as_ref(), "mallory", Some("m@example.com")).await;
    let now = Utc::now();
    let task = add_task(store.as_ref(), &owner, now).await;

    let err = scheduler
        .dispatcher()
        .send_now(&stranger.id, &task.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("task")));

    notifier.set_failing(true);
    let err = scheduler
        .dispatcher()
        .send_now(&owner.id, &task.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Notification(_)));
    let records = store
        .list_notifications(&owner.id, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NotificationStatus::Failed);

    let nobody = add_user(store.as_ref(), "ghost", None).await;
    let orphan = add_task(store.as_ref(), &nobody, now).await;
    let err = scheduler
        .dispatcher()
        .send_now(&nobody.id, &orphan.id, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)));
}
