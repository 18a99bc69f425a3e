//! Worker pool: concurrent consumers over the job queue

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dialcast_queue::{Job, JobFamily, JobQueue};
use dialcast_store::LeadStore;
use dialcast_telephony::VoiceProvider;

use crate::place_call::{build_answer_url, PlaceCallHandler};
use crate::rate_limit::DispatchLimiter;
use crate::refill::RefillHandler;
use crate::WorkerError;

/// Everything call placement needs to build provider-facing URLs
#[derive(Debug, Clone)]
pub struct CallPlacement {
    pub from_number: String,
    pub public_base_url: String,
    pub record: bool,
    pub timeout_secs: u32,
}

impl CallPlacement {
    pub fn answer_url(
        &self,
        speak_first: bool,
        initial_message: Option<&str>,
    ) -> Result<String, WorkerError> {
        build_answer_url(&self.public_base_url, speak_first, initial_message)
    }

    pub fn status_callback_url(&self) -> String {
        format!(
            "{}/webhooks/call-status",
            self.public_base_url.trim_end_matches('/')
        )
    }

    pub fn recording_callback_url(&self) -> String {
        format!(
            "{}/webhooks/recording",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

/// Dependencies injected into job handlers
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub leads: Arc<dyn LeadStore>,
    pub provider: Arc<dyn VoiceProvider>,
    pub placement: CallPlacement,
}

/// Worker pool tuning
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub rate_limit_count: u32,
    pub rate_limit_window: Duration,
    /// Idle sleep between claim attempts when the queue is empty
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_count: 10,
            rate_limit_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Pool of consumers against a single job stream
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    config: WorkerPoolConfig,
    limiter: Arc<DispatchLimiter>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<WorkerContext>, config: WorkerPoolConfig) -> Self {
        let limiter = Arc::new(DispatchLimiter::new(
            config.rate_limit_count,
            config.rate_limit_window,
        ));

        Self {
            ctx,
            config,
            limiter,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the consumers.
    ///
    /// Jobs stranded `active` by a previous crash are requeued first so
    /// they dispatch again instead of waiting for their leases in vain.
    pub async fn start(&self) {
        if let Err(e) = self.ctx.queue.requeue_expired().await {
            tracing::warn!(error = %e, "Startup lease recovery failed");
        }

        let mut handles = self.handles.lock();
        for worker_id in 0..self.config.concurrency {
            let ctx = self.ctx.clone();
            let limiter = self.limiter.clone();
            let shutdown = self.shutdown.clone();
            let poll_interval = self.config.poll_interval;

            handles.push(tokio::spawn(async move {
                consumer_loop(worker_id, ctx, limiter, shutdown, poll_interval).await;
            }));
        }

        tracing::info!(concurrency = self.config.concurrency, "Worker pool started");
    }

    /// Stop claiming new jobs and wait for in-flight jobs to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!("Worker pool drained");
    }
}

async fn consumer_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    limiter: Arc<DispatchLimiter>,
    shutdown: CancellationToken,
    poll_interval: Duration,
) {
    tracing::debug!(worker_id, "Consumer started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let job = match ctx.queue.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "Claim failed");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
        };

        // The claim is already ours; an empty bucket delays the run, it
        // never drops the job. Renew the lease after any wait.
        limiter.acquire().await;
        if let Err(e) = ctx.queue.renew_lease(&job.id, None).await {
            tracing::warn!(job_id = %job.id, error = %e, "Lease renewal failed");
        }

        run_job(&ctx, &job).await;
    }

    tracing::debug!(worker_id, "Consumer stopped");
}

/// Dispatch one claimed job to its family handler and record the outcome
async fn run_job(ctx: &WorkerContext, job: &Job) {
    tracing::info!(
        job_id = %job.id,
        family = %job.family.as_str(),
        attempt = job.attempts_made,
        "Job dispatched"
    );

    let result = match job.family {
        JobFamily::PlaceCall => PlaceCallHandler.run(job, ctx).await,
        JobFamily::RefillFromLeads => RefillHandler.run(job, ctx).await,
    };

    match result {
        Ok(value) => {
            if let Err(e) = ctx.queue.complete(&job.id, Some(value)).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record completion");
            }
        }
        Err(e) => {
            if let Err(record_err) = ctx.queue.fail(&job.id, &e.to_string(), e.is_terminal()).await
            {
                tracing::error!(job_id = %job.id, error = %record_err, "Failed to record failure");
            }
        }
    }
}
