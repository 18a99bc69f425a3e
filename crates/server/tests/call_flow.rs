//! End-to-end call flow: control plane → queue → worker → provider →
//! webhooks → persistence, with the voice provider mocked out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;

use dialcast_bridge::{BridgeError, RealtimeConnector, RealtimePeer, SessionRegistry};
use dialcast_config::Settings;
use dialcast_core::{CallStatus, Lead, LeadStatus};
use dialcast_queue::{JobQueue, JobState, QueueConfig};
use dialcast_scheduler::{CallScheduler, ScheduleCallRequest};
use dialcast_server::{webhooks, AppState};
use dialcast_store::{
    link_lead, schema, CallEventStore, LeadStore, SqliteCallEventStore, SqliteLeadStore,
    SqliteRecordingStore, SqliteTranscriptStore, SqliteUserStore, Stores, TranscriptStore,
};
use dialcast_telephony::{
    CallInitiated, InitiateCall, StatusCallbackPayload, TelephonyError, VoiceProvider,
};
use dialcast_worker::{CallPlacement, WorkerContext, WorkerPool, WorkerPoolConfig};

struct ScriptedProvider {
    calls: Mutex<Vec<InitiateCall>>,
}

#[async_trait]
impl VoiceProvider for ScriptedProvider {
    async fn initiate_call(&self, req: &InitiateCall) -> Result<CallInitiated, TelephonyError> {
        self.calls.lock().push(req.clone());
        Ok(CallInitiated {
            call_sid: "CA123".to_string(),
            status: CallStatus::Queued,
        })
    }
}

struct NoopConnector;

#[async_trait]
impl RealtimeConnector for NoopConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimePeer>, BridgeError> {
        Err(BridgeError::Connect("not wired in tests".to_string()))
    }
}

struct Flow {
    state: AppState,
    pool: Arc<WorkerPool>,
    provider: Arc<ScriptedProvider>,
}

async fn build_flow() -> Flow {
    let store_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::create_tables(&store_pool).await.unwrap();

    let stores = Arc::new(Stores {
        leads: Arc::new(SqliteLeadStore::new(store_pool.clone())),
        calls: Arc::new(SqliteCallEventStore::new(store_pool.clone())),
        transcripts: Arc::new(SqliteTranscriptStore::new(store_pool.clone())),
        recordings: Arc::new(SqliteRecordingStore::new(store_pool.clone())),
        users: Arc::new(SqliteUserStore::new(store_pool)),
    });

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

    let provider = Arc::new(ScriptedProvider {
        calls: Mutex::new(Vec::new()),
    });

    let worker_ctx = Arc::new(WorkerContext {
        queue: queue.clone(),
        leads: stores.leads.clone(),
        provider: provider.clone(),
        placement: CallPlacement {
            from_number: "+15550001111".to_string(),
            public_base_url: "https://dial.example.com".to_string(),
            record: true,
            timeout_secs: 30,
        },
    });
    let pool = Arc::new(WorkerPool::new(
        worker_ctx,
        WorkerPoolConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
    ));

    let mut settings = Settings::default();
    settings.server.public_base_url = "https://dial.example.com".to_string();

    let state = AppState {
        settings: Arc::new(settings),
        scheduler: Arc::new(CallScheduler::new(queue.clone(), stores.leads.clone())),
        stores,
        queue,
        sessions: SessionRegistry::new(),
        connector: Arc::new(NoopConnector),
    };

    Flow {
        state,
        pool,
        provider,
    }
}

async fn wait_for_state(flow: &Flow, job_id: &str, state: JobState) -> bool {
    for _ in 0..200 {
        let job = flow.state.queue.get(job_id).await.unwrap();
        if job.map(|j| j.state) == Some(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn immediate_call_flows_from_schedule_to_call_event() {
    let flow = build_flow().await;

    // A lead owns the dialed number.
    flow.state
        .stores
        .leads
        .create(&Lead::new("lead-1").with_phone("+15551234567"))
        .await
        .unwrap();

    flow.pool.start().await;

    // scheduleImmediate through the control plane.
    let job_id = flow
        .state
        .scheduler
        .schedule_immediate(ScheduleCallRequest {
            to: "+15551234567".to_string(),
            message: Some("Hello".to_string()),
            lead_id: Some("lead-1".to_string()),
            priority: dialcast_queue::JobPriority::High,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    assert!(wait_for_state(&flow, &job_id, JobState::Completed).await);
    flow.pool.shutdown().await;

    // The worker called the provider with the bridge answer URL.
    let calls = flow.provider.calls.lock();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].answer_url.starts_with("https://dial.example.com/twiml/answer"));
    drop(calls);

    // The job recorded the provider's SID.
    let job = flow.state.queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.result.as_ref().unwrap()["callSid"], "CA123");

    // The lead was marked contacted with that SID.
    let lead = flow.state.stores.leads.get("lead-1").await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::Contacted);
    assert_eq!(lead.call_sid.as_deref(), Some("CA123"));

    // Provider webhooks land out of order; the row still converges on the
    // terminal status with all fields merged.
    let completed: StatusCallbackPayload = serde_urlencoded::from_str(
        "CallSid=CA123&CallStatus=completed&To=%2B15551234567&Duration=42&Direction=outbound-api",
    )
    .unwrap();
    let ringing: StatusCallbackPayload =
        serde_urlencoded::from_str("CallSid=CA123&CallStatus=ringing&From=%2B15550001111").unwrap();

    assert_eq!(
        webhooks::call_status(State(flow.state.clone()), Form(completed)).await,
        StatusCode::OK
    );
    assert_eq!(
        webhooks::call_status(State(flow.state.clone()), Form(ringing)).await,
        StatusCode::OK
    );

    let event = flow.state.stores.calls.get("CA123").await.unwrap().unwrap();
    assert_eq!(event.status, CallStatus::Completed);
    assert_eq!(event.to_number.as_deref(), Some("+15551234567"));
    assert_eq!(event.from_number.as_deref(), Some("+15550001111"));
    assert_eq!(event.duration_secs, Some(42));
}

#[tokio::test]
async fn transcript_after_webhook_links_second_lead_call() {
    let flow = build_flow().await;

    // The lead was never called through the worker (no call_sid yet).
    flow.state
        .stores
        .leads
        .create(&Lead::new("lead-7").with_phone("+15557654321"))
        .await
        .unwrap();

    // Status webhook creates the call event first.
    let payload: StatusCallbackPayload = serde_urlencoded::from_str(
        "CallSid=CA999&CallStatus=in-progress&To=%2B15557654321",
    )
    .unwrap();
    webhooks::call_status(State(flow.state.clone()), Form(payload)).await;

    // First transcript arrives and triggers linkage.
    flow.state
        .stores
        .transcripts
        .append(&dialcast_core::NewTranscript::new(
            "CA999",
            dialcast_core::TranscriptRole::User,
            "hello?",
        ))
        .await
        .unwrap();
    link_lead(
        flow.state.stores.leads.as_ref(),
        flow.state.stores.calls.as_ref(),
        "CA999",
    )
    .await;

    let lead = flow.state.stores.leads.get("lead-7").await.unwrap().unwrap();
    assert_eq!(lead.call_sid.as_deref(), Some("CA999"));

    // Later transcripts must not re-link anything.
    link_lead(
        flow.state.stores.leads.as_ref(),
        flow.state.stores.calls.as_ref(),
        "CA999",
    )
    .await;
    let lead = flow.state.stores.leads.get("lead-7").await.unwrap().unwrap();
    assert_eq!(lead.call_sid.as_deref(), Some("CA999"));
}
