//! Observability Metrics
//!
//! Prometheus metrics endpoint for monitoring.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;

/// Global Prometheus handle
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder.
///
/// Must be called once at startup before recording any metrics.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_default_metrics();

    METRICS_HANDLE.get_or_init(|| handle.clone());
    handle
}

fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

fn register_default_metrics() {
    gauge!("dialcast_bridge_sessions_active").set(0.0);
    counter!("dialcast_calls_placed_total").absolute(0);
    counter!("dialcast_webhooks_total", "kind" => "call-status").absolute(0);
    counter!("dialcast_webhooks_total", "kind" => "recording").absolute(0);
    counter!("dialcast_transcripts_total").absolute(0);
}

/// Record the active bridge session gauge
pub fn record_active_sessions(count: usize) {
    gauge!("dialcast_bridge_sessions_active").set(count as f64);
}

/// Record a webhook delivery
pub fn record_webhook(kind: &'static str) {
    counter!("dialcast_webhooks_total", "kind" => kind).increment(1);
}

/// Metrics endpoint handler
///
/// Refreshes the queue-state gauges, then renders Prometheus text.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.sessions.count());

    if let Ok(counts) = state.queue.stats().await {
        gauge!("dialcast_jobs", "state" => "waiting").set(counts.waiting as f64);
        gauge!("dialcast_jobs", "state" => "delayed").set(counts.delayed as f64);
        gauge!("dialcast_jobs", "state" => "active").set(counts.active as f64);
        gauge!("dialcast_jobs", "state" => "completed").set(counts.completed as f64);
        gauge!("dialcast_jobs", "state" => "failed").set(counts.failed as f64);
    }

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
