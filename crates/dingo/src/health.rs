//! Health reporting for the daemon and the `health` subcommand.

use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use dingo_scheduler::Scheduler;
use dingo_store::DocumentStore;
use serde::Serialize;

/// Shared state for the health server.
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub scheduler: Scheduler,
}

/// Combined store and scheduler health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_tasks: Option<usize>,
    pub version: &'static str,
}

impl HealthReport {
    /// Probe the store and, when given, the scheduler.
    pub async fn collect(store: &DocumentStore, scheduler: Option<&Scheduler>) -> Self {
        let database = store.check_health().await;

        let (scheduler_ok, scheduled_tasks, running_tasks) = match scheduler {
            Some(scheduler) => (
                Some(scheduler.is_healthy().await),
                Some(scheduler.scheduled_tasks().await.len()),
                Some(scheduler.running_tasks().await.len()),
            ),
            None => (None, None, None),
        };

        let healthy = database && scheduler_ok.unwrap_or(true);
        Self {
            status: if healthy { "ok" } else { "degraded" },
            database,
            scheduler: scheduler_ok,
            scheduled_tasks,
            running_tasks,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Router serving `GET /health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthReport::collect(&state.store, Some(&state.scheduler)).await)
}
