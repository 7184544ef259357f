//! Task scheduler implementation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::types::{RunOutcome, TaskDescriptor};
use crate::{
    Cadence, RunningSnapshot, SchedulerConfig, SchedulerError, TaskArgs, TaskFn, TaskSnapshot,
    TaskSpec, delay_until_daily, delay_until_hourly,
};

const DAY: Duration = Duration::from_secs(24 * 3600);
const HOUR: Duration = Duration::from_secs(3600);

/// Counts from a single pass of the polling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Executions started this tick.
    pub dispatched: usize,
    /// Due tasks held back because their id was still running.
    pub skipped: usize,
    /// Finished handles removed from the running registry.
    pub swept: usize,
}

/// The task scheduler.
///
/// Cheap to clone; all clones share the same registries and loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    timezone: chrono_tz::Tz,
    /// Registration order is dispatch order.
    tasks: RwLock<Vec<TaskEntry>>,
    running: Mutex<HashMap<String, RunningTask>>,
    generations: AtomicU64,
    run_ids: AtomicU64,
    polling: Mutex<Option<PollingLoop>>,
}

struct TaskEntry {
    descriptor: TaskDescriptor,
    func: TaskFn,
}

struct RunningTask {
    run_id: u64,
    started_at: DateTime<Utc>,
    /// Cancels the task body.
    abort: AbortHandle,
    /// Records the outcome, then releases this entry.
    monitor: JoinHandle<()>,
}

struct PollingLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Scheduler {
    /// Create a new scheduler. The polling loop is not started.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let timezone = config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                timezone,
                tasks: RwLock::new(Vec::new()),
                running: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                run_ids: AtomicU64::new(0),
                polling: Mutex::new(None),
            }),
        })
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a task, replacing any task already registered under its id.
    ///
    /// A replacement keeps the old entry's position in dispatch order and
    /// starts from a fresh `Pending` status. An execution of the replaced
    /// registration that is still in flight keeps running and holds the id
    /// until it ends.
    #[tracing::instrument(skip(self, spec), fields(task_id = %spec.id))]
    pub async fn schedule(&self, spec: TaskSpec) -> Result<(), SchedulerError> {
        spec.validate()?;

        let schedule = spec.schedule();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let next_run = Instant::now() + spec.delay;
        let descriptor = TaskDescriptor::new(spec.id, schedule, next_run, spec.args, generation);
        let entry = TaskEntry {
            descriptor,
            func: spec.func,
        };

        let mut tasks = self.inner.tasks.write().await;
        match tasks
            .iter_mut()
            .find(|e| e.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => {
                *existing = entry;
                info!(delay = ?spec.delay, interval = ?schedule.interval(), "replaced scheduled task");
            }
            None => {
                tasks.push(entry);
                info!(delay = ?spec.delay, interval = ?schedule.interval(), "task scheduled");
            }
        }

        Ok(())
    }

    /// Register a task from its parts. See [`Scheduler::schedule`].
    pub async fn schedule_task(
        &self,
        id: impl Into<String>,
        func: TaskFn,
        interval: Option<Duration>,
        delay: Duration,
        args: TaskArgs,
    ) -> Result<(), SchedulerError> {
        let spec = TaskSpec::new(id, func)
            .interval(interval)
            .after(delay)
            .with_args(args);
        self.schedule(spec).await
    }

    /// Register a task that runs every day at `hour:minute` in the configured
    /// timezone.
    pub async fn schedule_daily(
        &self,
        id: impl Into<String>,
        func: TaskFn,
        hour: u32,
        minute: u32,
    ) -> Result<(), SchedulerError> {
        let now = Utc::now().with_timezone(&self.inner.timezone);
        let delay = delay_until_daily(&now, hour, minute)?;
        self.schedule(TaskSpec::new(id, func).every(DAY).after(delay))
            .await
    }

    /// Register a task that runs every hour at `:minute`.
    pub async fn schedule_hourly(
        &self,
        id: impl Into<String>,
        func: TaskFn,
        minute: u32,
    ) -> Result<(), SchedulerError> {
        let now = Utc::now().with_timezone(&self.inner.timezone);
        let delay = delay_until_hourly(&now, minute)?;
        self.schedule(TaskSpec::new(id, func).every(HOUR).after(delay))
            .await
    }

    /// Remove a task and request cancellation of its in-flight execution.
    ///
    /// Cancellation takes effect at the execution's next await point; work
    /// that never yields runs to completion. Returns true if anything was
    /// removed.
    pub async fn cancel_task(&self, id: &str) -> bool {
        let mut tasks = self.inner.tasks.write().await;
        let mut running = self.inner.running.lock().await;

        let before = tasks.len();
        tasks.retain(|e| e.descriptor.id != id);
        let unscheduled = tasks.len() != before;
        if unscheduled {
            info!(task_id = id, "cancelled task");
        }

        let stopped = match running.remove(id) {
            Some(run) => {
                run.abort.abort();
                info!(task_id = id, run_id = run.run_id, "stopped running task");
                true
            }
            None => false,
        };

        unscheduled || stopped
    }

    /// Snapshot of every registered task, in dispatch order.
    pub async fn scheduled_tasks(&self) -> Vec<TaskSnapshot> {
        let now = Instant::now();
        let wall = Utc::now();
        self.inner
            .tasks
            .read()
            .await
            .iter()
            .map(|e| e.descriptor.snapshot(now, wall))
            .collect()
    }

    /// Snapshot of a single task.
    pub async fn get_task(&self, id: &str) -> Option<TaskSnapshot> {
        let now = Instant::now();
        let wall = Utc::now();
        self.inner
            .tasks
            .read()
            .await
            .iter()
            .find(|e| e.descriptor.id == id)
            .map(|e| e.descriptor.snapshot(now, wall))
    }

    /// Snapshot of every in-flight execution, ordered by id.
    pub async fn running_tasks(&self) -> Vec<RunningSnapshot> {
        let mut runs: Vec<RunningSnapshot> = self
            .inner
            .running
            .lock()
            .await
            .iter()
            .map(|(id, run)| RunningSnapshot {
                id: id.clone(),
                run_id: run.run_id,
                started_at: run.started_at,
            })
            .collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        runs
    }

    /// Start the polling loop.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the loop is already alive.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut polling = self.inner.polling.lock().await;
        if let Some(existing) = polling.as_ref()
            && !existing.join.is_finished()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();
        let join = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
        *polling = Some(PollingLoop { shutdown_tx, join });

        info!(
            poll_interval = ?self.inner.config.poll_interval(),
            task_timeout = ?self.inner.config.task_timeout(),
            cadence = ?self.inner.config.cadence,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the loop, abort every running execution and clear both registries.
    ///
    /// Safe to call more than once. The scheduler can be started again.
    pub async fn shutdown(&self) {
        let polling = self.inner.polling.lock().await.take();
        if let Some(polling) = polling {
            let _ = polling.shutdown_tx.send(true);
            if let Err(e) = polling.join.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }

        let mut tasks = self.inner.tasks.write().await;
        let mut running = self.inner.running.lock().await;
        for (id, run) in running.drain() {
            run.abort.abort();
            info!(task_id = %id, run_id = run.run_id, "stopped running task");
        }
        tasks.clear();

        info!("scheduler shut down");
    }

    /// Whether the polling loop is alive.
    pub async fn is_healthy(&self) -> bool {
        self.inner
            .polling
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.join.is_finished())
    }

    /// Run one pass of the polling loop.
    ///
    /// Sweeps finished handles, then walks the registry in order and
    /// dispatches every due task whose id has no execution in flight.
    pub async fn tick(&self) -> TickReport {
        let now = Instant::now();
        let wall = Utc::now();
        let cadence = self.inner.config.cadence;
        let mut report = TickReport::default();

        let mut tasks = self.inner.tasks.write().await;
        let mut running = self.inner.running.lock().await;

        // The monitor releases its own entry after recording the outcome.
        // Anything left behind by a monitor that already ended is stale.
        let before = running.len();
        running.retain(|_, run| !run.monitor.is_finished());
        report.swept = before - running.len();

        for entry in tasks.iter_mut() {
            if !entry.descriptor.is_due(now) {
                continue;
            }

            if running.contains_key(&entry.descriptor.id) {
                report.skipped += 1;
                if cadence == Cadence::FixedRate {
                    entry.descriptor.advance(now);
                }
                debug!(task_id = %entry.descriptor.id, "task still running, skipping");
                continue;
            }

            entry.descriptor.mark_dispatched(now, wall, cadence);
            let run = self.dispatch(entry, wall);
            running.insert(entry.descriptor.id.clone(), run);
            report.dispatched += 1;
        }

        report
    }

    /// Spawn one execution of `entry` plus a monitor that records its outcome.
    fn dispatch(&self, entry: &TaskEntry, started_at: DateTime<Utc>) -> RunningTask {
        let run_id = self.inner.run_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let id = entry.descriptor.id.clone();
        let generation = entry.descriptor.generation;
        info!(task_id = %id, run_id, "executing task");

        let body = tokio::spawn(execute(
            Arc::clone(&entry.func),
            entry.descriptor.args.clone(),
            self.inner.config.task_timeout(),
        ));
        let abort = body.abort_handle();

        let scheduler = self.clone();
        let monitor = tokio::spawn(async move {
            let outcome = match body.await {
                Ok(outcome) => outcome,
                Err(e) => join_failure(e),
            };
            scheduler.finish(&id, run_id, generation, outcome).await;
        });

        RunningTask {
            run_id,
            started_at,
            abort,
            monitor,
        }
    }

    /// Release the running handle and record the outcome on the descriptor.
    async fn finish(&self, id: &str, run_id: u64, generation: u64, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::Succeeded => info!(task_id = id, run_id, "task completed"),
            RunOutcome::Failed(e) => error!(task_id = id, run_id, error = %e, "task failed"),
            RunOutcome::Panicked(msg) => error!(task_id = id, run_id, panic = %msg, "task panicked"),
            RunOutcome::TimedOut(limit) => {
                warn!(task_id = id, run_id, timeout = ?limit, "task timed out")
            }
            RunOutcome::Cancelled => info!(task_id = id, run_id, "task cancelled"),
        }

        let mut tasks = self.inner.tasks.write().await;
        let mut running = self.inner.running.lock().await;

        if running.get(id).is_some_and(|run| run.run_id == run_id) {
            running.remove(id);
        }

        if let Some(entry) = tasks
            .iter_mut()
            .find(|e| e.descriptor.id == id && e.descriptor.generation == generation)
        {
            entry
                .descriptor
                .record_outcome(&outcome, Instant::now(), self.inner.config.cadence);
        }
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = self.inner.config.poll_interval();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(report) if report != TickReport::default() => {
                    debug!(
                        dispatched = report.dispatched,
                        skipped = report.skipped,
                        swept = report.swept,
                        "scheduler tick"
                    );
                }
                Ok(_) => {}
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "scheduler tick panicked, continuing");
                }
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(poll_interval) => {}
            }
        }

        info!("scheduler loop stopped");
    }
}

/// Run a task body, enforcing the optional deadline.
async fn execute(func: TaskFn, args: TaskArgs, timeout: Option<Duration>) -> RunOutcome {
    let run = func(args);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result.into(),
            Err(_) => RunOutcome::TimedOut(limit),
        },
        None => run.await.into(),
    }
}

fn join_failure(err: JoinError) -> RunOutcome {
    if err.is_cancelled() {
        return RunOutcome::Cancelled;
    }
    match err.try_into_panic() {
        Ok(panic) => RunOutcome::Panicked(panic_message(panic.as_ref())),
        Err(err) => RunOutcome::Failed(err.to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
