//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task registration was rejected.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Invalid timezone string.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The polling loop has already been started.
    #[error("scheduler is already running")]
    AlreadyRunning,
}
