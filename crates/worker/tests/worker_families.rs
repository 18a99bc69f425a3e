//! Integration tests for the worker job families
//!
//! These run the real queue and lead store against an in-memory database,
//! with the voice provider mocked out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;

use dialcast_core::{CallStatus, Lead, LeadStatus};
use dialcast_queue::{EnqueueOptions, JobFamily, JobQueue, JobState, QueueConfig};
use dialcast_store::{schema, LeadStore, SqliteLeadStore};
use dialcast_telephony::{CallInitiated, InitiateCall, TelephonyError, VoiceProvider};
use dialcast_worker::{
    CallPlacement, PlaceCallHandler, RefillHandler, WorkerContext, WorkerPool, WorkerPoolConfig,
};

#[derive(Default)]
struct MockProvider {
    calls: Mutex<Vec<InitiateCall>>,
    reject: bool,
    outage: bool,
}

#[async_trait]
impl VoiceProvider for MockProvider {
    async fn initiate_call(&self, req: &InitiateCall) -> Result<CallInitiated, TelephonyError> {
        if self.outage {
            return Err(TelephonyError::Transient("provider 503".to_string()));
        }
        if self.reject {
            return Err(TelephonyError::Terminal("invalid phone number".to_string()));
        }

        let mut calls = self.calls.lock();
        calls.push(req.clone());
        Ok(CallInitiated {
            call_sid: format!("CA{:03}", calls.len()),
            status: CallStatus::Queued,
        })
    }
}

async fn build_context(provider: MockProvider) -> (Arc<WorkerContext>, Arc<MockProvider>) {
    let store_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::create_tables(&store_pool).await.unwrap();

    let queue_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let queue = Arc::new(
        JobQueue::with_pool(queue_pool, QueueConfig::default())
            .await
            .unwrap(),
    );

    let provider = Arc::new(provider);
    let ctx = Arc::new(WorkerContext {
        queue,
        leads: Arc::new(SqliteLeadStore::new(store_pool)),
        provider: provider.clone(),
        placement: CallPlacement {
            from_number: "+15550001111".to_string(),
            public_base_url: "https://dial.example.com".to_string(),
            record: true,
            timeout_secs: 30,
        },
    });

    (ctx, provider)
}

#[tokio::test]
async fn place_call_initiates_and_marks_lead() {
    let (ctx, provider) = build_context(MockProvider::default()).await;

    ctx.leads
        .create(&Lead::new("lead-1").with_phone("+15551234567"))
        .await
        .unwrap();

    ctx.queue
        .enqueue(
            JobFamily::PlaceCall,
            serde_json::json!({
                "to": "+15551234567",
                "message": "Hello",
                "leadId": "lead-1",
                "metadata": { "speakFirst": true, "initialMessage": "Hello" }
            }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    let result = PlaceCallHandler.run(&job, &ctx).await.unwrap();

    assert_eq!(result["callSid"], "CA001");
    assert_eq!(result["to"], "+15551234567");

    // The provider got bridge options and callback URLs.
    let calls = provider.calls.lock();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].answer_url.contains("speakFirst=true"));
    assert!(calls[0].answer_url.contains("initialMessage=Hello"));
    assert!(calls[0]
        .status_callback_url
        .ends_with("/webhooks/call-status"));
    drop(calls);

    // Lead bookkeeping happened.
    let lead = ctx.leads.get("lead-1").await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::Contacted);
    assert_eq!(lead.call_sid.as_deref(), Some("CA001"));
    assert!(lead.last_contacted_at.is_some());
}

#[tokio::test]
async fn place_call_rejects_empty_destination() {
    let (ctx, _) = build_context(MockProvider::default()).await;

    ctx.queue
        .enqueue(
            JobFamily::PlaceCall,
            serde_json::json!({ "to": "  " }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    let err = PlaceCallHandler.run(&job, &ctx).await.unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn place_call_provider_outage_is_retryable() {
    let (ctx, _) = build_context(MockProvider {
        outage: true,
        ..Default::default()
    })
    .await;

    ctx.queue
        .enqueue(
            JobFamily::PlaceCall,
            serde_json::json!({ "to": "+15551234567" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    let err = PlaceCallHandler.run(&job, &ctx).await.unwrap_err();
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn refill_schedules_only_callable_leads() {
    let (ctx, _) = build_context(MockProvider::default()).await;

    for i in 0..4 {
        ctx.leads
            .create(&Lead::new(format!("lead-{i}")).with_phone(format!("+1555000{i:04}")))
            .await
            .unwrap();
    }
    // One lead without a phone number must be skipped.
    ctx.leads.create(&Lead::new("lead-no-phone")).await.unwrap();

    let refill_id = ctx
        .queue
        .enqueue(
            JobFamily::RefillFromLeads,
            serde_json::json!({ "message": "Hello", "priority": "normal", "leadLimit": 10 }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    assert_eq!(job.id, refill_id);
    let result = RefillHandler.run(&job, &ctx).await.unwrap();
    ctx.queue.complete(&job.id, Some(result.clone())).await.unwrap();

    assert_eq!(result["scheduled"], 4);
    assert_eq!(result["jobIds"].as_array().unwrap().len(), 4);

    // The scheduled jobs are real place-call jobs with automation metadata.
    let stats = ctx.queue.stats().await.unwrap();
    assert_eq!(stats.waiting, 4);

    let next = ctx.queue.claim_next().await.unwrap().unwrap();
    assert_eq!(next.family, JobFamily::PlaceCall);
    assert_eq!(next.payload["metadata"]["automationRun"], true);
    assert!(next.payload["leadId"].as_str().unwrap().starts_with("lead-"));
}

#[tokio::test]
async fn refill_with_zero_limit_schedules_nothing() {
    let (ctx, _) = build_context(MockProvider::default()).await;

    ctx.leads
        .create(&Lead::new("lead-1").with_phone("+15551234567"))
        .await
        .unwrap();

    ctx.queue
        .enqueue(
            JobFamily::RefillFromLeads,
            serde_json::json!({ "leadLimit": 0 }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    let result = RefillHandler.run(&job, &ctx).await.unwrap();

    assert_eq!(result["scheduled"], 0);
}

#[tokio::test]
async fn pool_runs_jobs_end_to_end() {
    let (ctx, provider) = build_context(MockProvider::default()).await;

    let job_id = ctx
        .queue
        .enqueue(
            JobFamily::PlaceCall,
            serde_json::json!({ "to": "+15551234567", "message": "Hello" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let pool = WorkerPool::new(
        ctx.clone(),
        WorkerPoolConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );
    pool.start().await;

    // Wait for the job to finish.
    let mut done = false;
    for _ in 0..100 {
        let job = ctx.queue.get(&job_id).await.unwrap().unwrap();
        if job.state == JobState::Completed {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.shutdown().await;

    assert!(done, "job never completed");
    assert_eq!(provider.calls.lock().len(), 1);

    let job = ctx.queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.progress, 100);
    assert_eq!(job.result.as_ref().unwrap()["callSid"], "CA001");
}

#[tokio::test]
async fn pool_retries_failed_attempts_with_backoff() {
    let (ctx, _) = build_context(MockProvider {
        outage: true,
        ..Default::default()
    })
    .await;

    let job_id = ctx
        .queue
        .enqueue(
            JobFamily::PlaceCall,
            serde_json::json!({ "to": "+15551234567" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let job = ctx.queue.claim_next().await.unwrap().unwrap();
    let err = PlaceCallHandler.run(&job, &ctx).await.unwrap_err();
    ctx.queue
        .fail(&job.id, &err.to_string(), err.is_terminal())
        .await
        .unwrap();

    let job = ctx.queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert_eq!(job.attempts_made, 1);
    assert!(job.last_error.as_deref().unwrap().contains("503"));
}
