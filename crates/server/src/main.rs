//! dialcast server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use dialcast_config::{load_settings, Settings};
use dialcast_queue::JobQueue;
use dialcast_server::{create_router, init_metrics, AppState};

/// How often lease recovery and retention sweeps run
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("DIALCAST_ENV").ok();
    let settings = load_settings(env.as_deref())?;

    init_tracing(&settings);
    tracing::info!("Starting dialcast v{}", env!("CARGO_PKG_VERSION"));

    if settings.observability.metrics_enabled {
        let _handle = init_metrics();
        tracing::info!("Prometheus metrics at /metrics");
    }

    let host = settings.server.host.clone();
    let port = settings.server.port;

    let (state, pool) = AppState::from_settings(settings).await?;
    tracing::info!("Application state initialized");

    pool.start().await;

    let maintenance = spawn_maintenance(state.queue.clone());

    let app = create_router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Acceptors are closed; drain the workers, then stop maintenance.
    pool.shutdown().await;
    maintenance.abort();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Periodic queue upkeep: return crashed jobs to the queue and sweep
/// retention.
fn spawn_maintenance(queue: Arc<JobQueue>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if let Err(e) = queue.requeue_expired().await {
                tracing::warn!(error = %e, "Lease recovery failed");
            }
            if let Err(e) = queue.sweep_retention().await {
                tracing::warn!(error = %e, "Retention sweep failed");
            }
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Initialize tracing from the observability settings
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("dialcast={level},tower_http=warn").into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
