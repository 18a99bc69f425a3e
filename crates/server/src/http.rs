//! HTTP Endpoints
//!
//! Router for the webhook surface, the answer endpoint, the media-stream
//! WebSocket, and the scheduler control plane.

use axum::routing::{delete, get, post};
use axum::{extract::State, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::control;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::webhooks;
use crate::ws;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Provider surface
        .route("/twiml/answer", get(webhooks::answer).post(webhooks::answer))
        .route("/webhooks/call-status", post(webhooks::call_status))
        .route("/webhooks/recording", post(webhooks::recording))
        .route("/media-stream", get(ws::media_stream))
        // Scheduler control plane
        .route("/api/scheduler/calls", post(control::schedule_immediate))
        .route("/api/scheduler/calls/delayed", post(control::schedule_delayed))
        .route("/api/scheduler/calls/recurring", post(control::schedule_recurring))
        .route("/api/scheduler/calls/bulk", post(control::schedule_bulk))
        .route("/api/scheduler/refills", post(control::schedule_refill))
        .route("/api/scheduler/refills/run", post(control::run_refill_now))
        .route("/api/scheduler/schedules", get(control::list_schedules))
        .route("/api/scheduler/schedules/:id", delete(control::stop_schedule))
        .route("/api/scheduler/jobs", get(control::list_jobs))
        .route(
            "/api/scheduler/jobs/:id",
            get(control::get_job).delete(control::cancel_job),
        )
        .route("/api/scheduler/jobs/:id/retry", post(control::retry_job))
        .route("/api/scheduler/stats", get(control::stats))
        .route("/api/scheduler/clean", post(control::clean))
        .route("/api/scheduler/pause", post(control::pause))
        .route("/api/scheduler/resume", post(control::resume))
        // Health and observability
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler));

    router = router.layer(TraceLayer::new_for_http());

    if state.settings.server.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

/// Health check
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue_reachable = state.queue.stats().await.is_ok();

    Json(serde_json::json!({
        "status": if queue_reachable { "ready" } else { "degraded" },
        "activeSessions": state.sessions.count(),
        "queuePaused": state.queue.is_paused(),
    }))
}
