//! Provider webhook handlers
//!
//! Every handler answers 200 no matter what happened internally: a non-200
//! makes the provider redeliver, and the idempotent upserts already heal
//! missed data on the next event.

use axum::extract::{Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;

use dialcast_store::{AttachRecording, CallEventStore, RecordingStore};
use dialcast_telephony::{render_answer, AnswerParams, RecordingCallbackPayload, StatusCallbackPayload};

use crate::state::AppState;

/// Query parameters on the answer URL, carried through to the bridge
#[derive(Debug, Deserialize)]
pub struct AnswerQuery {
    #[serde(rename = "speakFirst", default)]
    pub speak_first: Option<String>,
    #[serde(rename = "initialMessage", default)]
    pub initial_message: Option<String>,
}

/// Answer endpoint: the provider fetches this when the callee picks up
pub async fn answer(
    State(state): State<AppState>,
    Query(query): Query<AnswerQuery>,
) -> impl IntoResponse {
    let params = AnswerParams {
        public_base_url: state.settings.server.public_base_url.clone(),
        speak_first: query.speak_first.as_deref() == Some("true"),
        initial_message: query.initial_message,
    };

    match render_answer(&params) {
        Ok(xml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/xml")],
            xml,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Answer rendering failed");
            // An empty TwiML document lets the call proceed without a
            // stream instead of failing it.
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/xml")],
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response/>".to_string(),
            )
        }
    }
}

/// Status callback: one merged row per call SID
pub async fn call_status(
    State(state): State<AppState>,
    Form(payload): Form<StatusCallbackPayload>,
) -> StatusCode {
    crate::metrics::record_webhook("call-status");
    tracing::debug!(
        call_sid = %payload.call_sid,
        status = %payload.call_status,
        "Status webhook received"
    );

    let update = payload.normalize();
    if let Err(e) = state.stores.calls.upsert(&update).await {
        tracing::error!(call_sid = %payload.call_sid, error = %e, "Call event upsert failed");
    }

    StatusCode::OK
}

/// Recording callback: answer immediately, persist asynchronously
pub async fn recording(
    State(state): State<AppState>,
    Form(payload): Form<RecordingCallbackPayload>,
) -> StatusCode {
    crate::metrics::record_webhook("recording");

    if !payload.is_completed() {
        tracing::debug!(
            call_sid = %payload.call_sid,
            status = %payload.recording_status,
            "Ignoring non-completed recording callback"
        );
        return StatusCode::OK;
    }

    tokio::spawn(async move {
        let attach = AttachRecording {
            call_sid: payload.call_sid.clone(),
            recording_sid: payload.recording_sid.clone(),
            status: payload.status(),
            duration_secs: payload.duration_secs(),
            size_bytes: None,
            // The object-storage collaborator fills the path in after
            // uploading; this row is the linkage it keys on.
            storage_path: None,
        };

        if let Err(e) = state.stores.recordings.attach(&attach).await {
            tracing::error!(
                call_sid = %payload.call_sid,
                recording_sid = %payload.recording_sid,
                error = %e,
                "Recording attach failed"
            );
        }
    });

    StatusCode::OK
}
