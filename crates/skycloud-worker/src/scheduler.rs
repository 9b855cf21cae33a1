//! Named recurring tasks with skip-if-running semantics.
//!
//! Every task has an explicit `Idle -> Running -> Idle` state. A tick that finds the
//! task `Running` is counted as skipped and dropped; it is never queued behind the
//! running invocation. Each run is bounded by the task period and a failed or timed
//! out run only affects its own tick.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work performed on every tick of a scheduled task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    /// The previous invocation is still running.
    Skipped,
    /// No task with that name is registered.
    Unknown,
}

/// Point-in-time view of a task's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub state: TaskState,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl Default for TaskStats {
    fn default() -> Self {
        Self {
            state: TaskState::Idle,
            runs: 0,
            skipped: 0,
            failures: 0,
            last_run: None,
        }
    }
}

struct ScheduledTask {
    name: String,
    period: Duration,
    handler: Arc<dyn TaskHandler>,
    stats: Mutex<TaskStats>,
}

impl ScheduledTask {
    fn try_begin(&self) -> TickOutcome {
        let Ok(mut stats) = self.stats.lock() else {
            return TickOutcome::Skipped;
        };
        if stats.state == TaskState::Running {
            stats.skipped += 1;
            return TickOutcome::Skipped;
        }
        stats.state = TaskState::Running;
        TickOutcome::Started
    }

    fn finish(&self, failed: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.state = TaskState::Idle;
            stats.runs += 1;
            if failed {
                stats.failures += 1;
            }
            stats.last_run = Some(Utc::now());
        }
    }

    async fn run_once(self: Arc<Self>) {
        let start = Instant::now();
        tracing::debug!(task = %self.name, "Scheduled task started");

        let handler = Arc::clone(&self.handler);
        let mut run = tokio::spawn(async move { handler.run().await });

        let failed = match tokio::time::timeout(self.period, &mut run).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(
                    task = %self.name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Scheduled task completed"
                );
                false
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(
                    task = %self.name,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Scheduled task failed"
                );
                true
            }
            Ok(Err(join_error)) => {
                tracing::error!(
                    task = %self.name,
                    error = %join_error,
                    "Scheduled task panicked"
                );
                true
            }
            Err(_) => {
                run.abort();
                tracing::warn!(
                    task = %self.name,
                    timeout_secs = self.period.as_secs_f64(),
                    "Scheduled task timed out"
                );
                true
            }
        };

        self.finish(failed);
    }
}

/// Registry of recurring lifecycle tasks.
///
/// Assumes a single active scheduler per deployment.
#[derive(Default)]
pub struct LifecycleScheduler {
    tasks: HashMap<String, Arc<ScheduledTask>>,
}

impl LifecycleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Re-registering a name replaces the previous task.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        handler: Arc<dyn TaskHandler>,
    ) -> &mut Self {
        let name = name.into();
        tracing::debug!(task = %name, period_secs = period.as_secs(), "Registered scheduled task");
        self.tasks.insert(
            name.clone(),
            Arc::new(ScheduledTask {
                name,
                period,
                handler,
                stats: Mutex::new(TaskStats::default()),
            }),
        );
        self
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        self.tasks
            .get(name)
            .and_then(|task| task.stats.lock().ok().map(|stats| stats.clone()))
    }

    /// Run one tick of `name` in the background unless it is already running.
    pub fn trigger(&self, name: &str) -> TickOutcome {
        let Some(task) = self.tasks.get(name) else {
            return TickOutcome::Unknown;
        };

        let outcome = task.try_begin();
        match outcome {
            TickOutcome::Started => {
                tokio::spawn(Arc::clone(task).run_once());
            }
            TickOutcome::Skipped => {
                tracing::debug!(task = %name, "Previous run still in progress, skipping tick");
            }
            TickOutcome::Unknown => {}
        }
        outcome
    }

    /// Spawn one interval loop per task. The first tick fires immediately.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loops = self
            .tasks
            .values()
            .map(|task| {
                let task = Arc::clone(task);
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(task.period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if task.try_begin() == TickOutcome::Started {
                                    tokio::spawn(Arc::clone(&task).run_once());
                                } else {
                                    tracing::debug!(task = %task.name, "Previous run still in progress, skipping tick");
                                }
                            }
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                })
            })
            .collect();

        tracing::info!(tasks = ?self.task_names(), "Lifecycle scheduler started");

        SchedulerHandle {
            shutdown_tx,
            loops,
        }
    }
}

/// Stops the interval loops started by [`LifecycleScheduler::start`].
///
/// Runs already in progress finish on their own.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.loops {
            let _ = handle.await;
        }
        tracing::info!("Lifecycle scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Blocks each run until the test releases a permit.
    struct GatedTask {
        runs: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl TaskHandler for GatedTask {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await?;
            permit.forget();
            Ok(())
        }
    }

    struct FailingTask {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for FailingTask {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    async fn wait_until_idle(scheduler: &LifecycleScheduler, name: &str) -> TaskStats {
        for _ in 0..200 {
            if let Some(stats) = scheduler.stats(name) {
                if stats.state == TaskState::Idle && stats.runs > 0 {
                    return stats;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {name} never finished");
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped() {
        let task = Arc::new(GatedTask {
            runs: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let mut scheduler = LifecycleScheduler::new();
        scheduler.register("slow", Duration::from_secs(60), task.clone());

        assert_eq!(scheduler.trigger("slow"), TickOutcome::Started);
        assert_eq!(scheduler.trigger("slow"), TickOutcome::Skipped);
        assert_eq!(scheduler.stats("slow").unwrap().state, TaskState::Running);

        task.gate.add_permits(1);
        let stats = wait_until_idle(&scheduler, "slow").await;

        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.skipped, 1);
        assert!(stats.last_run.is_some());

        // Idle again, so the next tick runs.
        task.gate.add_permits(1);
        assert_eq!(scheduler.trigger("slow"), TickOutcome::Started);
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_ticks() {
        let task = Arc::new(FailingTask {
            runs: AtomicUsize::new(0),
        });
        let mut scheduler = LifecycleScheduler::new();
        scheduler.register("flaky", Duration::from_secs(60), task.clone());

        assert_eq!(scheduler.trigger("flaky"), TickOutcome::Started);
        wait_until_idle(&scheduler, "flaky").await;
        assert_eq!(scheduler.trigger("flaky"), TickOutcome::Started);

        for _ in 0..200 {
            if scheduler.stats("flaky").unwrap().runs == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = scheduler.stats("flaky").unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failures, 2);
        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn runs_exceeding_their_period_time_out() {
        let task = Arc::new(GatedTask {
            runs: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let mut scheduler = LifecycleScheduler::new();
        scheduler.register("stuck", Duration::from_millis(50), task);

        assert_eq!(scheduler.trigger("stuck"), TickOutcome::Started);
        let stats = wait_until_idle(&scheduler, "stuck").await;
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn unknown_tasks() {
        let scheduler = LifecycleScheduler::new();
        assert_eq!(scheduler.trigger("nope"), TickOutcome::Unknown);
        assert!(scheduler.stats("nope").is_none());
    }

    #[tokio::test]
    async fn started_loops_tick_and_shut_down() {
        let task = Arc::new(GatedTask {
            runs: AtomicUsize::new(0),
            gate: Semaphore::new(100),
        });
        let mut scheduler = LifecycleScheduler::new();
        scheduler.register("tick", Duration::from_millis(20), task.clone());

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        assert!(task.runs.load(Ordering::SeqCst) >= 2);
    }
}
