//! Media bridge for the dialcast engine
//!
//! For each provider media stream this crate runs one session that relays
//! μ-law audio frames between the provider socket and an AI realtime
//! socket, drives turn-taking, handles reconnection and fallback, tracks
//! per-turn latency, and emits transcripts to the row store.

pub mod metrics;
pub mod provider;
pub mod realtime;
pub mod registry;
pub mod session;

pub use metrics::TurnClock;
pub use provider::{
    MarkPayload, MediaPayload, MediaTrack, ProviderMessage, ProviderOutbound, StartMeta,
};
pub use realtime::{
    ClientEvent, ConversationItem, RealtimeConnector, RealtimeEvent, RealtimePeer,
    RealtimeSessionConfig, TungsteniteConnector,
};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{BridgeSession, BridgeStores, SessionOptions, SessionOutcome, SessionState};

use thiserror::Error;

/// Bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Realtime connect failed: {0}")]
    Connect(String),

    #[error("Realtime connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Realtime socket closed abnormally (code {code})")]
    AbnormalClose { code: u16 },

    #[error("Realtime transport error: {0}")]
    Transport(String),

    #[error("Provider stream ended")]
    ProviderClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
