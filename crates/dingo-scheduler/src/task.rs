//! Task callables and registration specs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{SchedulerError, TaskArgs, TaskSchedule};

/// Longest delay or interval accepted at registration (100 years).
const MAX_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Future returned by a task callable.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Shared task callable. Invoked once per execution with a copy of the
/// arguments captured at registration.
pub type TaskFn = Arc<dyn Fn(TaskArgs) -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |args: TaskArgs| -> TaskFuture { Box::pin(f(args)) })
}

/// Wrap a synchronous closure as a [`TaskFn`].
///
/// The closure runs on tokio's blocking pool. Cancellation and timeouts
/// release the task's running handle but cannot stop the thread; it runs
/// to completion in the background.
pub fn blocking_task_fn<F>(f: F) -> TaskFn
where
    F: Fn(TaskArgs) -> Result<(), String> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |args: TaskArgs| -> TaskFuture {
        let f = Arc::clone(&f);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || f(args))
                .await
                .map_err(|e| format!("blocking task did not complete: {e}"))?
        })
    })
}

/// Everything needed to register a task.
///
/// Defaults: no delay, no repeat interval, no arguments.
#[derive(Clone)]
pub struct TaskSpec {
    pub(crate) id: String,
    pub(crate) func: TaskFn,
    pub(crate) interval: Option<Duration>,
    pub(crate) delay: Duration,
    pub(crate) args: TaskArgs,
}

impl TaskSpec {
    /// Create a one-shot spec that fires on the next tick.
    pub fn new(id: impl Into<String>, func: TaskFn) -> Self {
        Self {
            id: id.into(),
            func,
            interval: None,
            delay: Duration::ZERO,
            args: TaskArgs::default(),
        }
    }

    /// Repeat every `interval` after the first run.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the optional repeat interval.
    pub fn interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }

    /// Delay the first run.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Arguments handed to every execution.
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    /// The task id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn schedule(&self) -> TaskSchedule {
        TaskSchedule::from_interval(self.interval)
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask(
                "task id must not be empty".to_string(),
            ));
        }
        if let Some(interval) = self.interval {
            if interval.is_zero() {
                return Err(SchedulerError::InvalidTask(format!(
                    "task {}: interval must be greater than zero",
                    self.id
                )));
            }
            if interval > MAX_HORIZON {
                return Err(SchedulerError::InvalidTask(format!(
                    "task {}: interval {interval:?} is too long",
                    self.id
                )));
            }
        }
        if self.delay > MAX_HORIZON {
            return Err(SchedulerError::InvalidTask(format!(
                "task {}: delay {:?} is too long",
                self.id, self.delay
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("delay", &self.delay)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
