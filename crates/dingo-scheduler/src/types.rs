//! Scheduler types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::Cadence;

/// How a task is scheduled to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSchedule {
    /// Run once when `next_run` passes.
    Once,
    /// Run repeatedly, `every` apart.
    Interval {
        #[serde(rename = "seconds", serialize_with = "serialize_secs")]
        every: Duration,
    },
}

impl TaskSchedule {
    /// Build a schedule from an optional repeat interval.
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            Some(every) => Self::Interval { every },
            None => Self::Once,
        }
    }

    /// The repeat interval, if recurring.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::Interval { every } => Some(*every),
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Current status of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `next_run`.
    #[default]
    Pending,
    /// An execution is in flight.
    Running,
    /// A one-shot task finished successfully.
    Completed,
    /// The last execution failed, panicked or timed out.
    Failed { error: String },
}

/// Positional and keyword arguments captured at registration time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    /// Create an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument called `name`.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// Point-in-time copy of a registered task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub schedule: TaskSchedule,
    pub status: TaskStatus,
    /// Wall-clock estimate of the next eligible dispatch.
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    /// Consecutive failures (resets on success).
    pub failure_count: u32,
    pub registered_at: DateTime<Utc>,
    pub args: TaskArgs,
}

/// Point-in-time copy of an in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningSnapshot {
    pub id: String,
    /// Unique per execution across the scheduler's lifetime.
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

impl RunOutcome {
    fn error(&self) -> Option<String> {
        match self {
            Self::Succeeded => None,
            Self::Failed(error) => Some(error.clone()),
            Self::Panicked(message) => Some(format!("task panicked: {message}")),
            Self::TimedOut(limit) => Some(format!("task timed out after {limit:?}")),
            Self::Cancelled => Some("task was cancelled".to_string()),
        }
    }
}

impl From<Result<(), String>> for RunOutcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(error) => Self::Failed(error),
        }
    }
}

/// A registered unit of work, minus its callable.
#[derive(Debug, Clone)]
pub(crate) struct TaskDescriptor {
    pub id: String,
    pub schedule: TaskSchedule,
    pub next_run: Instant,
    pub args: TaskArgs,
    pub status: TaskStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u32,
    pub registered_at: DateTime<Utc>,
    /// Distinguishes re-registrations of the same id.
    pub generation: u64,
}

impl TaskDescriptor {
    pub fn new(
        id: String,
        schedule: TaskSchedule,
        next_run: Instant,
        args: TaskArgs,
        generation: u64,
    ) -> Self {
        Self {
            id,
            schedule,
            next_run,
            args,
            status: TaskStatus::Pending,
            last_run: None,
            run_count: 0,
            failure_count: 0,
            registered_at: Utc::now(),
            generation,
        }
    }

    /// Check whether this task is eligible for dispatch at `now`.
    ///
    /// One-shot tasks are eligible only until their first dispatch.
    pub fn is_due(&self, now: Instant) -> bool {
        match (&self.schedule, &self.status) {
            (TaskSchedule::Once, TaskStatus::Pending) => self.next_run <= now,
            (TaskSchedule::Once, _) => false,
            (TaskSchedule::Interval { .. }, _) => self.next_run <= now,
        }
    }

    /// Record a dispatch at `now`.
    pub fn mark_dispatched(&mut self, now: Instant, wall: DateTime<Utc>, cadence: Cadence) {
        self.status = TaskStatus::Running;
        self.last_run = Some(wall);
        self.run_count += 1;
        if cadence == Cadence::FixedRate {
            self.advance(now);
        }
    }

    /// Move a recurring task's `next_run` to one interval after `from`.
    pub fn advance(&mut self, from: Instant) {
        if let Some(every) = self.schedule.interval() {
            self.next_run = from + every;
        }
    }

    /// Record how an execution ended.
    pub fn record_outcome(&mut self, outcome: &RunOutcome, finished: Instant, cadence: Cadence) {
        match outcome.error() {
            None => {
                self.failure_count = 0;
                self.status = match self.schedule {
                    TaskSchedule::Once => TaskStatus::Completed,
                    TaskSchedule::Interval { .. } => TaskStatus::Pending,
                };
            }
            Some(error) => {
                self.failure_count += 1;
                self.status = TaskStatus::Failed { error };
            }
        }

        if cadence == Cadence::FixedDelay {
            self.advance(finished);
        }
    }

    /// Copy out the public view, translating `next_run` to wall-clock time.
    pub fn snapshot(&self, now: Instant, wall: DateTime<Utc>) -> TaskSnapshot {
        let next_run = if self.next_run >= now {
            wall + to_chrono(self.next_run - now)
        } else {
            wall - to_chrono(now - self.next_run)
        };

        TaskSnapshot {
            id: self.id.clone(),
            schedule: self.schedule,
            status: self.status.clone(),
            next_run,
            last_run: self.last_run,
            run_count: self.run_count,
            failure_count: self.failure_count,
            registered_at: self.registered_at,
            args: self.args.clone(),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
