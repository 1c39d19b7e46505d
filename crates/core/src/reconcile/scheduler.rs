//! Reconciliation scheduler.
//!
//! Runs each [`ScheduledTask`] in its own loop:
//! - Exclusive retry: every `exclusive_retry_interval_secs`
//! - Data repair: once a day at `data_repair_hour:data_repair_minute` local time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

use super::config::SchedulerConfig;
use super::reconciler::Reconciler;
use super::ReconcileError;

/// Reconciliation work the scheduler can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    ExclusiveRetry,
    DataRepair,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::ExclusiveRetry => "exclusive_retry",
            Task::DataRepair => "data_repair",
        }
    }
}

/// When a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed delay between the end of one pass and the next.
    Every(Duration),
    /// Once a day at a local wall-clock time.
    DailyAt { hour: u32, minute: u32 },
}

impl Trigger {
    /// Time to wait from `now` (local wall clock) until the next firing.
    pub fn next_delay(&self, now: NaiveDateTime) -> Duration {
        match *self {
            Trigger::Every(interval) => interval,
            Trigger::DailyAt { hour, minute } => {
                let Some(at) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                    return Duration::from_secs(24 * 60 * 60);
                };
                let mut next = now.date().and_time(at);
                if next <= now {
                    next += chrono::Duration::days(1);
                }
                (next - now).to_std().unwrap_or_default()
            }
        }
    }
}

/// One row of the schedule table.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub trigger: Trigger,
    pub task: Task,
}

/// Owns the reconciliation loops and their lifecycle.
pub struct ReconciliationScheduler {
    enabled: bool,
    tasks: Vec<ScheduledTask>,
    reconciler: Arc<Reconciler>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconciliationScheduler {
    /// Build the schedule from configuration.
    pub fn new(config: &SchedulerConfig, reconciler: Arc<Reconciler>) -> Self {
        let tasks = vec![
            ScheduledTask {
                name: Task::ExclusiveRetry.name(),
                trigger: Trigger::Every(Duration::from_secs(config.exclusive_retry_interval_secs)),
                task: Task::ExclusiveRetry,
            },
            ScheduledTask {
                name: Task::DataRepair.name(),
                trigger: Trigger::DailyAt {
                    hour: config.data_repair_hour,
                    minute: config.data_repair_minute,
                },
                task: Task::DataRepair,
            },
        ];
        Self::with_tasks(config.enabled, tasks, reconciler)
    }

    /// Build a scheduler with an explicit schedule table.
    pub fn with_tasks(enabled: bool, tasks: Vec<ScheduledTask>, reconciler: Arc<Reconciler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            enabled,
            tasks,
            reconciler,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the scheduler (spawns one loop per task).
    pub async fn start(&self) {
        if !self.enabled {
            info!("Reconciliation scheduler disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconciliation scheduler already running");
            return;
        }

        info!(tasks = self.tasks.len(), "Starting reconciliation scheduler");
        let mut handles = self.handles.lock().await;
        for entry in &self.tasks {
            handles.push(self.spawn_loop(*entry));
        }
    }

    /// Stop the scheduler and wait for its loops to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Reconciliation scheduler not running");
            return;
        }

        info!("Stopping reconciliation scheduler");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciliation loop ended abnormally");
            }
        }
        info!("Reconciliation scheduler stopped");
    }

    /// Run one task immediately, outside the schedule.
    pub async fn run_once(&self, task: Task) -> Result<(), ReconcileError> {
        Self::run_task(&self.reconciler, task).await
    }

    fn spawn_loop(&self, entry: ScheduledTask) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let reconciler = Arc::clone(&self.reconciler);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(task = entry.name, trigger = ?entry.trigger, "Reconciliation loop started");
            loop {
                let delay = entry.trigger.next_delay(Local::now().naive_local());
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(task = entry.name, "Reconciliation loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::run_task(&reconciler, entry.task).await {
                            warn!(task = entry.name, error = %e, "Reconciliation pass failed");
                        }
                    }
                }
            }
        })
    }

    async fn run_task(reconciler: &Reconciler, task: Task) -> Result<(), ReconcileError> {
        let result = match task {
            Task::ExclusiveRetry => reconciler
                .retry_exclusive_inner_flow()
                .await
                .map(|report| debug!(?report, "Exclusive retry pass done")),
            Task::DataRepair => reconciler
                .auto_create_data_repair_ticket()
                .await
                .map(|report| {
                    info!(
                        clusters = report.clusters,
                        created = report.created.len(),
                        skipped = report.skipped,
                        failed = report.failed,
                        "Data repair pass done"
                    )
                }),
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::RECONCILE_PASSES
            .with_label_values(&[task.name(), outcome])
            .inc();
        result
    }
}
