//! Built-in recurring jobs registered by the daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dingo_scheduler::{Scheduler, SchedulerError, TaskFn, TaskSpec, task_fn};
use dingo_store::{ANALYTICS, DocumentStore, StoreError, SYSTEM};
use serde_json::{Map, json};
use tracing::{debug, info};

/// Periodic flush of the document store.
pub const STORE_FLUSH: &str = "store-flush";

/// Hourly per-collection document counts.
pub const ANALYTICS_SNAPSHOT: &str = "analytics-snapshot";

const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Register every built-in job on `scheduler`.
pub async fn register(scheduler: &Scheduler, store: &Arc<DocumentStore>) -> Result<(), SchedulerError> {
    scheduler
        .schedule(
            TaskSpec::new(STORE_FLUSH, flush_job(Arc::clone(store)))
                .every(FLUSH_INTERVAL)
                .after(FLUSH_INTERVAL),
        )
        .await?;

    scheduler
        .schedule_hourly(ANALYTICS_SNAPSHOT, analytics_job(Arc::clone(store)), 0)
        .await?;

    info!(jobs = 2, "registered built-in jobs");
    Ok(())
}

fn flush_job(store: Arc<DocumentStore>) -> TaskFn {
    task_fn(move |_| {
        let store = Arc::clone(&store);
        async move {
            // Every successful mutation already reached disk
            if !store.is_dirty().await {
                debug!("document store clean, skipping flush");
                return Ok(());
            }
            store.flush().await.map_err(|e| e.to_string())?;
            info!("flushed pending document store changes");
            Ok(())
        }
    })
}

fn analytics_job(store: Arc<DocumentStore>) -> TaskFn {
    task_fn(move |_| {
        let store = Arc::clone(&store);
        async move {
            snapshot_counts(&store)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
    })
}

/// Record how many documents each collection holds.
///
/// The snapshot is stored under `analytics/<UTC timestamp>`. The analytics
/// and system collections are not counted. Returns the key written.
pub async fn snapshot_counts(store: &DocumentStore) -> Result<String, StoreError> {
    let taken_at = Utc::now();

    let mut counts = Map::new();
    for name in store.collection_names().await {
        if name == ANALYTICS || name == SYSTEM {
            continue;
        }
        let count = store.count(&name).await;
        counts.insert(name, json!(count));
    }

    let key = taken_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    store
        .set(
            ANALYTICS,
            &key,
            json!({
                "taken_at": taken_at.to_rfc3339(),
                "counts": counts,
            }),
        )
        .await?;

    info!(key = %key, "analytics snapshot recorded");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dingo_scheduler::SchedulerConfig;
    use dingo_store::{CAMPAIGNS, StoreConfig, USERS};
    use pretty_assertions::assert_eq;

    async fn memory_store() -> Arc<DocumentStore> {
        Arc::new(DocumentStore::open(&StoreConfig::in_memory()).await.unwrap())
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let store = memory_store().await;
        store.set(USERS, "u1", json!({})).await.unwrap();
        store.set(USERS, "u2", json!({})).await.unwrap();
        store.set(CAMPAIGNS, "c1", json!({})).await.unwrap();
        assert!(store.check_health().await);

        let key = snapshot_counts(&store).await.unwrap();
        let snapshot = store.get(ANALYTICS, &key).await.unwrap();

        assert_eq!(
            snapshot["counts"],
            json!({"campaigns": 1, "content": 0, "users": 2})
        );
        assert!(snapshot["taken_at"].is_string());
    }

    #[tokio::test]
    async fn test_register_builtin_jobs() {
        let store = memory_store().await;
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();

        register(&scheduler, &store).await.unwrap();

        let ids: Vec<_> = scheduler
            .scheduled_tasks()
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![STORE_FLUSH, ANALYTICS_SNAPSHOT]);

        let flush = scheduler.get_task(STORE_FLUSH).await.unwrap();
        assert_eq!(flush.schedule.interval(), Some(FLUSH_INTERVAL));
    }

    #[tokio::test]
    async fn test_flush_job_skips_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(DocumentStore::open(&StoreConfig::at(&path)).await.unwrap());

        let job = flush_job(Arc::clone(&store));
        job(Default::default()).await.unwrap();
        assert!(!path.exists());

        // Closed and clean is not an error either
        store.close().await.unwrap();
        job(Default::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_job_writes_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(DocumentStore::open(&StoreConfig::at(&path)).await.unwrap());

        // A directory in the file's place makes the write fail and leaves it dirty
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupant"), "x").unwrap();
        assert!(store.set(USERS, "u1", json!(1)).await.is_err());
        assert!(store.is_dirty().await);

        std::fs::remove_dir_all(&path).unwrap();
        let job = flush_job(Arc::clone(&store));
        job(Default::default()).await.unwrap();

        assert!(!store.is_dirty().await);
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["users"], json!({"u1": 1}));
    }
}
