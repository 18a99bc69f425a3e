//! The `place-call` job family

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use dialcast_queue::Job;
use dialcast_telephony::InitiateCall;

use crate::pool::WorkerContext;
use crate::WorkerError;

/// Payload of a place-call job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallPayload {
    pub to: String,
    /// What the assistant should open with
    #[serde(default)]
    pub message: Option<String>,
    /// Lead to mark contacted once the call is placed
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub metadata: PlaceCallMetadata,
}

/// Per-call options carried through to the media bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallMetadata {
    #[serde(default)]
    pub speak_first: bool,
    #[serde(default)]
    pub initial_message: Option<String>,
    /// Set when a refill pass scheduled this call
    #[serde(default)]
    pub automation_run: bool,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Handler for place-call jobs
pub struct PlaceCallHandler;

impl PlaceCallHandler {
    pub async fn run(
        &self,
        job: &Job,
        ctx: &WorkerContext,
    ) -> Result<serde_json::Value, WorkerError> {
        let payload: PlaceCallPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;

        if payload.to.trim().is_empty() {
            return Err(WorkerError::InvalidPayload(
                "destination number is required".to_string(),
            ));
        }

        // Cooperative cancellation point before the provider call. Once the
        // provider has accepted an initiation there is no rollback.
        if ctx.queue.is_cancel_requested(&job.id).await? {
            return Err(WorkerError::Canceled);
        }

        let initial_message = payload
            .metadata
            .initial_message
            .clone()
            .or_else(|| payload.message.clone());

        let request = InitiateCall {
            to: payload.to.clone(),
            from: ctx.placement.from_number.clone(),
            answer_url: ctx.placement.answer_url(payload.metadata.speak_first, initial_message.as_deref())?,
            status_callback_url: ctx.placement.status_callback_url(),
            recording_callback_url: ctx.placement.recording_callback_url(),
            record: ctx.placement.record,
            timeout_secs: ctx.placement.timeout_secs,
        };

        let initiated = ctx.provider.initiate_call(&request).await?;
        metrics::counter!("dialcast_calls_placed_total").increment(1);

        if let Some(lead_id) = &payload.lead_id {
            // Lead bookkeeping is best-effort; the call already exists.
            if let Err(e) = ctx
                .leads
                .mark_contacted(lead_id, &initiated.call_sid, Utc::now())
                .await
            {
                tracing::warn!(
                    lead_id = %lead_id,
                    call_sid = %initiated.call_sid,
                    error = %e,
                    "Failed to mark lead contacted"
                );
            }
        }

        Ok(serde_json::json!({
            "callSid": initiated.call_sid,
            "to": payload.to,
            "providerStatus": initiated.status.as_str(),
        }))
    }
}

/// URL construction shared by call placement
pub(crate) fn build_answer_url(
    public_base_url: &str,
    speak_first: bool,
    initial_message: Option<&str>,
) -> Result<String, WorkerError> {
    let base = public_base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/twiml/answer"))
        .map_err(|e| WorkerError::InvalidPayload(format!("bad public base URL: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("speakFirst", if speak_first { "true" } else { "false" });
        if let Some(message) = initial_message {
            query.append_pair("initialMessage", message);
        }
    }

    Ok(url.into())
}
