//! In-process background task scheduler for Dingo.
//!
//! This crate provides a polling scheduler that:
//! - Runs one-shot and recurring tasks on the tokio runtime
//! - Never runs two executions of the same task id at once
//! - Isolates task failures, panics and timeouts from the loop
//! - Offers daily/hourly helpers evaluated in a configured timezone
//!
//! Scheduling is single-process only. Nothing is persisted: the host
//! re-registers its tasks on every start.

mod calendar;
mod config;
mod error;
mod scheduler;
mod task;
mod types;

pub use calendar::{delay_until_daily, delay_until_hourly};
pub use config::{Cadence, SchedulerConfig};
pub use error::SchedulerError;
pub use scheduler::{Scheduler, TickReport};
pub use task::{TaskFn, TaskFuture, TaskSpec, blocking_task_fn, task_fn};
pub use types::{RunningSnapshot, TaskArgs, TaskSchedule, TaskSnapshot, TaskStatus};
