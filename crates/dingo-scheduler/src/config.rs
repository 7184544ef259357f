//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// How a recurring task's next run is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// `next_run = dispatch time + interval`, fixed at dispatch.
    ///
    /// Ticks that find the task still running also advance `next_run`, so a
    /// long execution is followed by the next regular slot rather than a
    /// burst of catch-up runs.
    #[default]
    FixedRate,

    /// `next_run = completion time + interval`.
    ///
    /// The task is not re-armed while an execution is in flight.
    FixedDelay,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the polling loop in milliseconds. Defaults to 10 seconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hard deadline per execution in seconds. `None` lets executions run
    /// for as long as they like.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,

    /// Cadence policy for recurring tasks.
    #[serde(default)]
    pub cadence: Cadence,

    /// IANA timezone used by the daily/hourly helpers. Defaults to "UTC".
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: None,
            cadence: Cadence::default(),
            timezone: default_timezone(),
        }
    }
}

impl SchedulerConfig {
    /// Tick period of the polling loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-execution deadline, if any.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Parse the configured timezone string into a `chrono_tz::Tz`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the string is not a valid
    /// IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }

    pub(crate) fn validate(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        if self.poll_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        self.parse_timezone()
    }
}
