//! The `refill-from-leads` job family
//!
//! Turns uncontacted leads into place-call jobs. Runs either as a cron
//! repeat or as a one-shot triggered from the control plane.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use dialcast_queue::{EnqueueOptions, Job, JobFamily, JobPriority};

use crate::place_call::{PlaceCallMetadata, PlaceCallPayload};
use crate::pool::WorkerContext;
use crate::WorkerError;

/// Payload of a refill job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefillPayload {
    /// Opening line for every scheduled call
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_lead_limit")]
    pub lead_limit: u32,
}

fn default_lead_limit() -> u32 {
    50
}

/// Result of one refill pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefillReport {
    pub scheduled: usize,
    pub job_ids: Vec<String>,
}

/// One refill pass: query uncontacted leads, keep the dialable ones, and
/// enqueue a place-call job for each. Shared by the job handler and the
/// control plane's run-now path.
pub async fn schedule_refill_calls(
    leads: &dyn dialcast_store::LeadStore,
    queue: &dialcast_queue::JobQueue,
    payload: &RefillPayload,
) -> Result<RefillReport, WorkerError> {
    let candidates = leads.list_uncontacted(payload.lead_limit).await?;
    let scheduled_at = Utc::now();
    let mut job_ids = Vec::new();

    for lead in candidates.iter().filter(|l| l.is_callable()) {
        let phone = lead.phone.clone().unwrap_or_default();
        let call_payload = PlaceCallPayload {
            to: phone,
            message: payload.message.clone(),
            lead_id: Some(lead.id.clone()),
            metadata: PlaceCallMetadata {
                speak_first: true,
                initial_message: payload.message.clone(),
                automation_run: true,
                scheduled_at: Some(scheduled_at),
            },
        };

        let id = queue
            .enqueue(
                JobFamily::PlaceCall,
                serde_json::to_value(&call_payload)
                    .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?,
                EnqueueOptions::default().with_priority(payload.priority),
            )
            .await?;
        job_ids.push(id);
    }

    Ok(RefillReport {
        scheduled: job_ids.len(),
        job_ids,
    })
}

/// Handler for refill jobs
pub struct RefillHandler;

impl RefillHandler {
    pub async fn run(
        &self,
        job: &Job,
        ctx: &WorkerContext,
    ) -> Result<serde_json::Value, WorkerError> {
        let payload: RefillPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;

        if ctx.queue.is_cancel_requested(&job.id).await? {
            return Err(WorkerError::Canceled);
        }

        let report = schedule_refill_calls(ctx.leads.as_ref(), &ctx.queue, &payload).await?;

        tracing::info!(
            refill_job = %job.id,
            scheduled = report.scheduled,
            lead_limit = payload.lead_limit,
            "Refill pass complete"
        );

        Ok(serde_json::json!({
            "scheduled": report.scheduled,
            "jobIds": report.job_ids,
        }))
    }
}
