//! Wall-clock helpers for daily and hourly tasks.
//!
//! These are pure functions of `now`; the scheduler calls them with the
//! current time in its configured timezone and registers the result as the
//! initial delay of a 24 h / 1 h recurring task.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike};

use crate::SchedulerError;

/// Delay from `now` until the next `hour:minute:00` local time.
///
/// Today's slot is used only if it is strictly after `now`. Local times that
/// fall in a DST gap resolve to the first valid instant after the gap. The
/// result is truncated to whole seconds.
pub fn delay_until_daily<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Result<Duration, SchedulerError> {
    check_hour(hour)?;
    check_minute(minute)?;

    let tz = now.timezone();
    let mut date = now.date_naive();
    // Three candidate days cover "already passed today" plus a DST gap.
    for _ in 0..3 {
        let naive = date
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| SchedulerError::InvalidTask(format!("invalid time {hour}:{minute}")))?;
        if let Some(target) = resolve_local(&tz, naive)
            && target > *now
        {
            return Ok(whole_seconds(now, &target));
        }
        date = date
            .succ_opt()
            .ok_or_else(|| SchedulerError::InvalidTask("date out of range".to_string()))?;
    }

    Err(SchedulerError::InvalidTask(format!(
        "no valid local time for {hour:02}:{minute:02}"
    )))
}

/// Delay from `now` until the next `:minute:00` of an hour.
pub fn delay_until_hourly<Tz: TimeZone>(
    now: &DateTime<Tz>,
    minute: u32,
) -> Result<Duration, SchedulerError> {
    check_minute(minute)?;

    let naive = now
        .date_naive()
        .and_hms_opt(now.hour(), minute, 0)
        .ok_or_else(|| SchedulerError::InvalidTask(format!("invalid minute {minute}")))?;
    let mut target = resolve_local(&now.timezone(), naive).unwrap_or_else(|| now.clone());
    while target <= *now {
        target = target + chrono::Duration::hours(1);
    }

    Ok(whole_seconds(now, &target))
}

fn check_hour(hour: u32) -> Result<(), SchedulerError> {
    if hour > 23 {
        return Err(SchedulerError::InvalidTask(format!(
            "hour must be 0-23, got {hour}"
        )));
    }
    Ok(())
}

fn check_minute(minute: u32) -> Result<(), SchedulerError> {
    if minute > 59 {
        return Err(SchedulerError::InvalidTask(format!(
            "minute must be 0-59, got {minute}"
        )));
    }
    Ok(())
}

/// Map a local wall time to an instant, stepping past DST gaps.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
    })
}

fn whole_seconds<Tz: TimeZone>(now: &DateTime<Tz>, target: &DateTime<Tz>) -> Duration {
    let secs = (target.clone() - now.clone()).num_seconds().max(0);
    Duration::from_secs(secs as u64)
}
