//! End-to-end behaviour of the polling loop.
//!
//! All tests run on tokio's paused clock, so sleeps complete instantly and
//! timings are exact.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use dingo_scheduler::{
    Cadence, Scheduler, SchedulerConfig, SchedulerError, TaskArgs, TaskFn, TaskSpec, TaskStatus,
    task_fn,
};

fn config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_ms: 100,
        ..Default::default()
    }
}

async fn started(config: SchedulerConfig) -> Scheduler {
    let scheduler = Scheduler::new(config).unwrap();
    scheduler.start().await.unwrap();
    scheduler
}

fn counter_task(counter: Arc<AtomicUsize>) -> TaskFn {
    task_fn(move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Tracks how many executions overlap and when each one started.
#[derive(Default)]
struct Probe {
    current: AtomicUsize,
    peak: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

fn probed_task(probe: Arc<Probe>, work: Duration) -> TaskFn {
    task_fn(move |_| {
        let probe = Arc::clone(&probe);
        async move {
            probe.starts.lock().await.push(Instant::now());
            let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
            probe.peak.fetch_max(now, Ordering::SeqCst);
            sleep(work).await;
            probe.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn one_shot_fires_exactly_once() {
    let scheduler = started(config()).await;
    let count = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule(TaskSpec::new("t", counter_task(Arc::clone(&count))).after(Duration::from_millis(100)))
        .await
        .unwrap();

    sleep(Duration::from_millis(250)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(scheduler.running_tasks().await.is_empty());

    sleep(Duration::from_secs(5)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let task = scheduler.get_task("t").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recurring_task_keeps_cadence() {
    let scheduler = started(config()).await;
    let count = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule_task(
            "t",
            counter_task(Arc::clone(&count)),
            Some(Duration::from_secs(1)),
            Duration::ZERO,
            TaskArgs::new(),
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(4500)).await;
    assert!(count.load(Ordering::SeqCst) >= 4);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_before_fire_prevents_run() {
    let scheduler = started(config()).await;
    let count = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule(TaskSpec::new("t", counter_task(Arc::clone(&count))).after(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(scheduler.cancel_task("t").await);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(scheduler.scheduled_tasks().await.is_empty());

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_task_never_overlaps_itself() {
    let scheduler = started(config()).await;
    let probe = Arc::new(Probe::default());

    scheduler
        .schedule(
            TaskSpec::new("slow", probed_task(Arc::clone(&probe), Duration::from_millis(2500)))
                .every(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    assert!(probe.starts.lock().await.len() >= 2);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_waits_for_completion() {
    let scheduler = started(SchedulerConfig {
        cadence: Cadence::FixedDelay,
        ..config()
    })
    .await;
    let probe = Arc::new(Probe::default());
    let work = Duration::from_millis(2050);
    let interval = Duration::from_secs(1);

    scheduler
        .schedule(TaskSpec::new("t", probed_task(Arc::clone(&probe), work)).every(interval))
        .await
        .unwrap();

    sleep(Duration::from_secs(10)).await;
    let starts = probe.starts.lock().await.clone();
    assert!(starts.len() >= 2);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= work + interval);
    }

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn last_registration_wins() {
    let scheduler = started(config()).await;
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule(TaskSpec::new("t", counter_task(Arc::clone(&first))).after(Duration::from_millis(500)))
        .await
        .unwrap();
    scheduler
        .schedule(TaskSpec::new("t", counter_task(Arc::clone(&second))).after(Duration::from_millis(500)))
        .await
        .unwrap();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.scheduled_tasks().await.len(), 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_task_does_not_stop_others() {
    let scheduler = started(config()).await;
    let count = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule(TaskSpec::new(
            "broken",
            task_fn(|_| async { Err("metrics endpoint unreachable".to_string()) }),
        ))
        .await
        .unwrap();
    scheduler
        .schedule(TaskSpec::new(
            "panicky",
            task_fn(|args: TaskArgs| async move {
                let _campaign = args.arg(0).expect("missing campaign id");
                Ok(())
            }),
        ))
        .await
        .unwrap();
    scheduler
        .schedule(TaskSpec::new("healthy", counter_task(Arc::clone(&count))).every(Duration::from_secs(1)))
        .await
        .unwrap();

    sleep(Duration::from_millis(2500)).await;
    assert!(count.load(Ordering::SeqCst) >= 2);
    assert!(scheduler.is_healthy().await);

    let broken = scheduler.get_task("broken").await.unwrap();
    assert_eq!(
        broken.status,
        TaskStatus::Failed {
            error: "metrics endpoint unreachable".to_string()
        }
    );
    assert_eq!(broken.run_count, 1);

    let panicky = scheduler.get_task("panicky").await.unwrap();
    match panicky.status {
        TaskStatus::Failed { error } => assert!(error.contains("missing campaign id")),
        other => panic!("expected Failed, got {other:?}"),
    }

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timeout_releases_hung_task() {
    let scheduler = started(SchedulerConfig {
        task_timeout_secs: Some(1),
        ..config()
    })
    .await;
    let starts = Arc::new(AtomicUsize::new(0));
    let hung = {
        let starts = Arc::clone(&starts);
        task_fn(move |_| {
            let starts = Arc::clone(&starts);
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok(())
            }
        })
    };

    scheduler
        .schedule(TaskSpec::new("hung", hung).every(Duration::from_secs(2)))
        .await
        .unwrap();

    sleep(Duration::from_millis(4500)).await;
    assert!(starts.load(Ordering::SeqCst) >= 2);

    let task = scheduler.get_task("hung").await.unwrap();
    assert!(task.failure_count >= 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tasks_receive_registered_args() {
    let scheduler = started(config()).await;
    let seen = Arc::new(Mutex::new(None));

    let recorder = {
        let seen = Arc::clone(&seen);
        task_fn(move |args: TaskArgs| {
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock().await = Some(args);
                Ok(())
            }
        })
    };

    let args = TaskArgs::new()
        .with_arg("campaign-42")
        .with_kwarg("channel", "github");
    scheduler
        .schedule(TaskSpec::new("follow-up", recorder).with_args(args.clone()))
        .await
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().await.clone(), Some(args));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_is_rejected_while_running() {
    let scheduler = started(config()).await;
    assert!(scheduler.is_healthy().await);
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    scheduler.shutdown().await;
    assert!(!scheduler.is_healthy().await);

    // Restart after shutdown is allowed
    scheduler.start().await.unwrap();
    assert!(scheduler.is_healthy().await);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything() {
    let scheduler = started(config()).await;
    let probe = Arc::new(Probe::default());

    scheduler
        .schedule(TaskSpec::new("long", probed_task(Arc::clone(&probe), Duration::from_secs(3600))))
        .await
        .unwrap();
    scheduler
        .schedule(TaskSpec::new("future", probed_task(Arc::clone(&probe), Duration::ZERO)).after(Duration::from_secs(60)))
        .await
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.running_tasks().await.len(), 1);

    scheduler.shutdown().await;
    assert!(scheduler.running_tasks().await.is_empty());
    assert!(scheduler.scheduled_tasks().await.is_empty());
    assert!(!scheduler.is_healthy().await);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(probe.starts.lock().await.len(), 1);

    // Idempotent
    scheduler.shutdown().await;
}
