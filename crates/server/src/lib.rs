//! dialcast server
//!
//! Wires the engine together behind an axum router: provider webhooks, the
//! TwiML answer endpoint, the media-stream WebSocket, and the scheduler
//! control plane.

pub mod control;
pub mod http;
pub mod metrics;
pub mod state;
pub mod webhooks;
pub mod ws;

pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error(transparent)]
    Config(#[from] dialcast_config::ConfigError),

    #[error(transparent)]
    Store(#[from] dialcast_store::StoreError),

    #[error(transparent)]
    Queue(#[from] dialcast_queue::QueueError),

    #[error(transparent)]
    Telephony(#[from] dialcast_telephony::TelephonyError),
}
