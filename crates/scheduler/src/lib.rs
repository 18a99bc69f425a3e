//! Scheduler control plane
//!
//! Transport-agnostic operations over the job queue: schedule calls
//! (immediate, delayed, recurring, bulk), register and stop refill
//! schedules, run a refill on the spot, and pass through job management.
//! Validation happens here so the queue only ever sees well-formed work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dialcast_queue::{
    cron_util, BulkJob, CancelOutcome, EnqueueOptions, Job, JobCounts, JobFamily, JobPriority,
    JobQueue, JobState, QueueError,
};
use dialcast_store::LeadStore;
use dialcast_worker::{
    schedule_refill_calls, PlaceCallMetadata, PlaceCallPayload, RefillPayload, RefillReport,
    WorkerError,
};

/// Refill batches are bounded to keep one pass from flooding the queue
pub const MAX_LEAD_LIMIT: u32 = 500;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// A call to schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCallRequest {
    pub to: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub metadata: PlaceCallMetadata,
}

/// When a delayed call should fire: an absolute time or a relative delay
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelaySpec {
    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl DelaySpec {
    /// Effective delay: `max(0, target − now)`
    fn resolve(&self) -> u64 {
        if let Some(at) = self.schedule_at {
            (at - Utc::now()).num_milliseconds().max(0) as u64
        } else {
            self.delay_ms.unwrap_or(0)
        }
    }
}

/// A registered repeat schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    /// Stable id for the whole repeat chain; pass to `stop_schedule`
    pub job_id: String,
    pub family: JobFamily,
    pub cron_expression: String,
    pub next_run_at: DateTime<Utc>,
}

/// Control plane over the queue and the lead store
pub struct CallScheduler {
    queue: Arc<JobQueue>,
    leads: Arc<dyn LeadStore>,
}

impl CallScheduler {
    pub fn new(queue: Arc<JobQueue>, leads: Arc<dyn LeadStore>) -> Self {
        Self { queue, leads }
    }

    /// Enqueue one place-call job for immediate dispatch
    pub async fn schedule_immediate(
        &self,
        req: ScheduleCallRequest,
    ) -> Result<String, SchedulerError> {
        let (payload, priority) = Self::to_place_call(req)?;
        let id = self
            .queue
            .enqueue(
                JobFamily::PlaceCall,
                payload,
                EnqueueOptions::default().with_priority(priority),
            )
            .await?;

        tracing::info!(job_id = %id, "Immediate call scheduled");
        Ok(id)
    }

    /// Enqueue one place-call job delayed to a target time
    pub async fn schedule_delayed(
        &self,
        req: ScheduleCallRequest,
        when: DelaySpec,
    ) -> Result<String, SchedulerError> {
        let (payload, priority) = Self::to_place_call(req)?;
        let delay_ms = when.resolve();

        let id = self
            .queue
            .enqueue(
                JobFamily::PlaceCall,
                payload,
                EnqueueOptions::default()
                    .with_priority(priority)
                    .with_delay_ms(delay_ms),
            )
            .await?;

        tracing::info!(job_id = %id, delay_ms, "Delayed call scheduled");
        Ok(id)
    }

    /// Register a recurring place-call schedule
    pub async fn schedule_recurring(
        &self,
        req: ScheduleCallRequest,
        cron_expression: &str,
    ) -> Result<String, SchedulerError> {
        cron_util::parse_pattern(cron_expression)?;
        let (payload, priority) = Self::to_place_call(req)?;

        let id = self
            .queue
            .enqueue(
                JobFamily::PlaceCall,
                payload,
                EnqueueOptions::default()
                    .with_priority(priority)
                    .with_repeat(cron_expression),
            )
            .await?;

        tracing::info!(job_id = %id, cron = %cron_expression, "Recurring call registered");
        Ok(id)
    }

    /// Atomic bulk enqueue: all requests land or none do
    pub async fn schedule_bulk(
        &self,
        requests: Vec<ScheduleCallRequest>,
    ) -> Result<Vec<String>, SchedulerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::with_capacity(requests.len());
        for req in requests {
            let (payload, priority) = Self::to_place_call(req)?;
            jobs.push(BulkJob {
                family: JobFamily::PlaceCall,
                payload,
                opts: EnqueueOptions::default().with_priority(priority),
            });
        }

        Ok(self.queue.bulk_enqueue(jobs).await?)
    }

    /// Register a cron-driven refill from the lead store
    pub async fn schedule_refill(
        &self,
        cron_expression: &str,
        message: Option<String>,
        priority: JobPriority,
        lead_limit: u32,
    ) -> Result<String, SchedulerError> {
        cron_util::parse_pattern(cron_expression)?;
        let lead_limit = lead_limit.clamp(1, MAX_LEAD_LIMIT);

        let payload = RefillPayload {
            message,
            priority,
            lead_limit,
        };
        let id = self
            .queue
            .enqueue(
                JobFamily::RefillFromLeads,
                serde_json::to_value(&payload).map_err(QueueError::from)?,
                EnqueueOptions::default()
                    .with_priority(priority)
                    .with_repeat(cron_expression),
            )
            .await?;

        tracing::info!(job_id = %id, cron = %cron_expression, lead_limit, "Refill schedule registered");
        Ok(id)
    }

    /// One-shot refill pass, executed now; returns the scheduled count
    pub async fn run_refill_now(
        &self,
        message: Option<String>,
        priority: JobPriority,
        lead_limit: u32,
    ) -> Result<RefillReport, SchedulerError> {
        let payload = RefillPayload {
            message,
            priority,
            lead_limit: lead_limit.min(MAX_LEAD_LIMIT),
        };

        let report = schedule_refill_calls(self.leads.as_ref(), &self.queue, &payload).await?;
        tracing::info!(scheduled = report.scheduled, "Manual refill pass complete");
        Ok(report)
    }

    /// Registered repeats, one entry per chain
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleInfo>, SchedulerError> {
        let carriers = self.queue.list_repeating().await?;

        Ok(carriers
            .into_iter()
            .filter_map(|job| {
                let cron_expression = job.repeat_pattern?;
                Some(ScheduleInfo {
                    job_id: job.parent_id.unwrap_or(job.id),
                    family: job.family,
                    cron_expression,
                    next_run_at: job.scheduled_at,
                })
            })
            .collect())
    }

    /// Remove a repeat schedule; no further runs spawn
    pub async fn stop_schedule(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let removed = self.queue.remove_repeating(job_id).await?;
        Ok(removed > 0)
    }

    // Thin pass-throughs to the job store.

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, SchedulerError> {
        Ok(self.queue.get(job_id).await?)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<CancelOutcome, SchedulerError> {
        Ok(self.queue.cancel(job_id).await?)
    }

    pub async fn retry_job(&self, job_id: &str) -> Result<bool, SchedulerError> {
        Ok(self.queue.retry(job_id).await?)
    }

    pub async fn stats(&self) -> Result<JobCounts, SchedulerError> {
        Ok(self.queue.stats().await?)
    }

    pub async fn list_by_state(
        &self,
        state: JobState,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.queue.list(state, offset, limit).await?)
    }

    pub async fn clean(
        &self,
        grace_ms: u64,
        limit: u32,
        state: JobState,
    ) -> Result<u64, SchedulerError> {
        Ok(self.queue.clean(grace_ms, limit, state).await?)
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    fn to_place_call(
        req: ScheduleCallRequest,
    ) -> Result<(serde_json::Value, JobPriority), SchedulerError> {
        if req.to.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "destination number is required".to_string(),
            ));
        }

        let priority = req.priority;
        let payload = PlaceCallPayload {
            to: req.to,
            message: req.message,
            lead_id: req.lead_id,
            metadata: req.metadata,
        };

        Ok((
            serde_json::to_value(&payload).map_err(QueueError::from)?,
            priority,
        ))
    }
}
