//! Media stream WebSocket handler
//!
//! The provider connects here after fetching the answer document. The
//! handler waits for the `start` frame, then hands the connection to one
//! bridge session: two pump tasks shuttle frames between the socket and
//! the session's channels, the session itself runs in this task.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use dialcast_bridge::{BridgeSession, BridgeStores, ProviderMessage, SessionOptions};

use crate::state::AppState;

/// Frames buffered per direction while the session catches up
const CHANNEL_DEPTH: usize = 256;

/// Per-call options arriving on the stream URL
#[derive(Debug, Deserialize)]
pub struct MediaStreamQuery {
    #[serde(rename = "speakFirst", default)]
    pub speak_first: Option<String>,
    #[serde(rename = "initialMessage", default)]
    pub initial_message: Option<String>,
}

pub async fn media_stream(
    ws: WebSocketUpgrade,
    Query(query): Query<MediaStreamQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state, query))
}

async fn handle_media_socket(socket: WebSocket, state: AppState, query: MediaStreamQuery) {
    let (mut sender, mut receiver) = socket.split();

    // Nothing to bridge until the provider announces the call.
    let (call_sid, stream_sid) = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ProviderMessage>(&text) {
                Ok(ProviderMessage::Start { stream_sid, start }) => {
                    break (start.call_sid, stream_sid);
                }
                Ok(ProviderMessage::Connected { .. }) => continue,
                Ok(other) => {
                    tracing::debug!(frame = ?other, "Frame before start ignored");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable frame before start");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!("Media socket closed before start");
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Media socket error before start");
                return;
            }
        }
    };

    tracing::info!(call_sid = %call_sid, stream_sid = %stream_sid, "Media stream started");
    state.sessions.insert(call_sid.as_str(), stream_sid.as_str());
    crate::metrics::record_active_sessions(state.sessions.count());

    let (provider_in_tx, provider_in_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (provider_out_tx, mut provider_out_rx) = mpsc::channel(CHANNEL_DEPTH);

    // Outbound pump: session frames onto the socket, order preserved.
    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = provider_out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Outbound frame serialization failed");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound pump: socket frames into the session until the socket ends.
    let inbound_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ProviderMessage>(&text) {
                    Ok(frame) => {
                        if provider_in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Unparseable media frame skipped");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Media socket read error");
                    break;
                }
            }
        }
        // Dropping the sender tells the session the provider leg is gone.
    });

    let realtime = &state.settings.realtime;
    let options = SessionOptions {
        voice: realtime.voice.clone(),
        speak_first: query.speak_first.as_deref() == Some("true"),
        initial_message: query.initial_message.clone(),
        max_response_tokens: realtime.max_response_tokens,
        max_connect_attempts: realtime.max_connect_attempts,
        ..Default::default()
    };

    let stores = BridgeStores {
        transcripts: state.stores.transcripts.clone(),
        leads: state.stores.leads.clone(),
        calls: state.stores.calls.clone(),
    };

    let session =
        BridgeSession::new(call_sid.as_str(), stream_sid.as_str(), options, stores, provider_out_tx);
    let outcome = session.run(state.connector.clone(), provider_in_rx).await;

    state.sessions.remove(&call_sid);
    crate::metrics::record_active_sessions(state.sessions.count());
    inbound_task.abort();
    outbound_task.abort();

    tracing::info!(
        call_sid = %call_sid,
        failed = outcome.failed,
        transcripts = outcome.transcripts_written,
        "Media stream finished"
    );
}
