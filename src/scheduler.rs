//! Due-task reminder scheduler.
//!
//! One tick:
//!
//! 1. Load every task with `due_at <= now`, status `pending` or `overdue`,
//!    reminders enabled and `notified = false`.
//! 2. Dispatch each one independently (up to `concurrency` at a time):
//!    resolve the recipient, take a short claim on the task, send, then
//!    record the attempt. Success sets `notified`; failure leaves it unset
//!    so the next tick retries.
//! 3. Move every pending task with `due_at < now` to `overdue`.
//!
//! While the notifier is disabled step 2 is skipped entirely (nothing is
//! recorded) and step 3 still runs.
//!
//! A storage error in step 1 or 2 aborts the tick: dispatches not yet
//! started are skipped, step 3 does not run, and the next tick starts
//! over. Ticks never overlap; a tick requested while another is running
//! is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mindflow_core::lifecycle;
use mindflow_core::models::{NotificationRecord, Task};
use mindflow_core::store::{DueReminder, Store};

use crate::config::SchedulerConfig;
use crate::error::{owned, ServiceError, ServiceResult};
use crate::notify::{Notifier, NotifyError, OutgoingMail};

/// What happened to one due task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { recipient: String },
    Failed { recipient: String, error: String },
    /// Neither a reminder address nor an account email.
    NoRecipient,
    /// Another dispatcher holds the claim.
    Contended,
    /// `max_attempts` failed attempts since the reminder was last armed.
    Exhausted { attempts: u64 },
}

/// Counts for one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub overdue: u64,
}

impl TickReport {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent { .. } => self.sent += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            _ => self.skipped += 1,
        }
    }
}

/// Sends reminders for single tasks and records every attempt.
pub struct ReminderDispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    claim_lease: chrono::Duration,
    max_attempts: Option<u32>,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        claim_lease: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            store,
            notifier,
            claim_lease: chrono::Duration::from_std(claim_lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(120)),
            max_attempts,
        }
    }

    /// Dispatch one due reminder. `Err` only for storage failures.
    pub async fn dispatch(&self, due: &DueReminder, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let task = &due.task;

        let Some(recipient) = lifecycle::resolve_recipient(task, due.owner_email.as_deref()) else {
            warn!(task_id = %task.id, "no reminder recipient; skipping");
            return Ok(DispatchOutcome::NoRecipient);
        };

        if let Some(max) = self.max_attempts {
            let attempts = self.store.failed_attempts(&task.id).await?;
            if attempts >= u64::from(max) {
                warn!(task_id = %task.id, attempts, "reminder attempts exhausted; skipping");
                return Ok(DispatchOutcome::Exhausted { attempts });
            }
        }

        if !self
            .store
            .claim_reminder(&task.id, now, now + self.claim_lease)
            .await?
        {
            warn!(task_id = %task.id, "reminder claimed elsewhere; skipping");
            return Ok(DispatchOutcome::Contended);
        }

        self.deliver(task, &recipient, now).await
    }

    async fn deliver(
        &self,
        task: &Task,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let mail = OutgoingMail::reminder(recipient, task);
        match self.notifier.send(&mail).await {
            Ok(()) => {
                self.store
                    .complete_reminder(&NotificationRecord::sent(&task.id, recipient, now))
                    .await?;
                info!(task_id = %task.id, recipient, "reminder sent");
                Ok(DispatchOutcome::Sent {
                    recipient: recipient.to_string(),
                })
            }
            Err(e) => {
                let error = e.to_string();
                self.store
                    .fail_reminder(&NotificationRecord::failed(
                        &task.id, recipient, &error, now,
                    ))
                    .await?;
                warn!(task_id = %task.id, recipient, error = %error, "reminder failed");
                Ok(DispatchOutcome::Failed {
                    recipient: recipient.to_string(),
                    error,
                })
            }
        }
    }

    pub fn notifier_enabled(&self) -> bool {
        self.notifier.is_enabled()
    }

    /// Send a reminder for one owned task right away, ignoring due date,
    /// status and the claim. The attempt is recorded either way, unless
    /// mail is disabled, in which case nothing is sent or recorded.
    pub async fn send_now(
        &self,
        owner_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<NotificationRecord> {
        let task = owned(
            self.store.get_task(task_id).await?,
            |t| t.owner_id.as_str(),
            owner_id,
            "task",
        )?;
        let owner_email = self
            .store
            .get_user(owner_id)
            .await?
            .and_then(|u| u.email);
        let recipient = lifecycle::resolve_recipient(&task, owner_email.as_deref())
            .ok_or_else(|| ServiceError::invalid("task has no reminder recipient"))?;
        if !self.notifier.is_enabled() {
            return Err(NotifyError::Disabled.into());
        }

        let mail = OutgoingMail::reminder(&recipient, &task);
        match self.notifier.send(&mail).await {
            Ok(()) => {
                let record = NotificationRecord::sent(&task.id, &recipient, now);
                self.store.complete_reminder(&record).await?;
                info!(task_id = %task.id, recipient = %recipient, "manual reminder sent");
                Ok(record)
            }
            Err(e) => {
                let record =
                    NotificationRecord::failed(&task.id, &recipient, &e.to_string(), now);
                self.store.fail_reminder(&record).await?;
                warn!(task_id = %task.id, error = %e, "manual reminder failed");
                Err(e.into())
            }
        }
    }
}

struct TickRunner {
    store: Arc<dyn Store>,
    dispatcher: ReminderDispatcher,
    concurrency: usize,
    tick_lock: tokio::sync::Mutex<()>,
    last_tick: Mutex<Option<(DateTime<Utc>, TickReport)>>,
}

impl TickRunner {
    async fn run_tick(&self, now: DateTime<Utc>) -> Result<Option<TickReport>> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return Ok(None);
        };

        let due = self.store.due_reminders(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        if !self.dispatcher.notifier_enabled() {
            if !due.is_empty() {
                warn!(due = due.len(), "mail delivery disabled; reminders not dispatched");
            }
            report.skipped = due.len();
            report.overdue = self.store.mark_overdue(now).await?;
            self.remember(now, &report);
            return Ok(Some(report));
        }

        let aborted = AtomicBool::new(false);
        let results: Vec<Option<Result<DispatchOutcome>>> = stream::iter(due)
            .map(|reminder| {
                let aborted = &aborted;
                async move {
                    if aborted.load(Ordering::SeqCst) {
                        return None;
                    }
                    let result = self.dispatcher.dispatch(&reminder, now).await;
                    if result.is_err() {
                        aborted.store(true, Ordering::SeqCst);
                    }
                    Some(result)
                }
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Some(Ok(outcome)) => report.record(&outcome),
                Some(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                None => {}
            }
        }
        if let Some(e) = first_error {
            return Err(e.context("reminder dispatch aborted"));
        }

        report.overdue = self.store.mark_overdue(now).await?;

        self.remember(now, &report);
        Ok(Some(report))
    }

    fn remember(&self, now: DateTime<Utc>, report: &TickReport) {
        if let Ok(mut last) = self.last_tick.lock() {
            *last = Some((now, report.clone()));
        }
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduler status for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

/// Recurring reminder job with an explicit `start`/`stop` lifecycle.
pub struct ReminderScheduler {
    runner: Arc<TickRunner>,
    interval: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: &SchedulerConfig,
    ) -> Self {
        let dispatcher = ReminderDispatcher::new(
            store.clone(),
            notifier,
            Duration::from_secs(config.claim_lease_secs),
            config.max_attempts,
        );
        Self {
            runner: Arc::new(TickRunner {
                store,
                dispatcher,
                concurrency: config.concurrency,
                tick_lock: tokio::sync::Mutex::new(()),
                last_tick: Mutex::new(None),
            }),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            running: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &ReminderDispatcher {
        &self.runner.dispatcher
    }

    /// Run one pass now. `Ok(None)` when another tick is still running.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<Option<TickReport>> {
        self.runner.run_tick(now).await
    }

    /// Spawn the timer loop. The first tick fires one interval from now.
    /// Returns `false` if the loop is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let runner = self.runner.clone();
        let period = self.interval;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "reminder scheduler started");
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match runner.run_tick(Utc::now()).await {
                            Ok(Some(report)) => info!(
                                due = report.due,
                                sent = report.sent,
                                failed = report.failed,
                                skipped = report.skipped,
                                overdue = report.overdue,
                                "scheduler tick finished"
                            ),
                            Ok(None) => debug!("previous tick still running; skipped"),
                            Err(e) => error!(error = %format!("{e:#}"), "scheduler tick aborted"),
                        }
                    }
                }
            }
            info!("reminder scheduler stopped");
        });

        *running = Some(RunningLoop { cancel, handle });
        true
    }

    /// Cancel the loop and wait for it to finish. A tick in progress
    /// completes first.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let last = self
            .runner
            .last_tick
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        SchedulerStatus {
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            last_tick_at: last.as_ref().map(|(at, _)| *at),
            last_report: last.map(|(_, report)| report),
        }
    }
}
