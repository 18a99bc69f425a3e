//! Application State

use std::sync::Arc;
use std::time::Duration;

use dialcast_bridge::{RealtimeConnector, SessionRegistry, TungsteniteConnector};
use dialcast_config::Settings;
use dialcast_queue::{JobQueue, QueueConfig};
use dialcast_scheduler::CallScheduler;
use dialcast_store::Stores;
use dialcast_telephony::{TwilioClient, TwilioConfig, VoiceProvider};
use dialcast_worker::{CallPlacement, WorkerContext, WorkerPool, WorkerPoolConfig};

use crate::ServerError;

/// Shared application state, injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub stores: Arc<Stores>,
    pub queue: Arc<JobQueue>,
    pub scheduler: Arc<CallScheduler>,
    pub sessions: Arc<SessionRegistry>,
    pub connector: Arc<dyn RealtimeConnector>,
}

impl AppState {
    /// Build the full dependency graph from settings: stores, queue,
    /// provider client, realtime connector, scheduler.
    pub async fn from_settings(settings: Settings) -> Result<(Self, Arc<WorkerPool>), ServerError> {
        let stores = Arc::new(dialcast_store::init(&settings.database.store_path).await?);

        let queue = Arc::new(
            JobQueue::open(
                &settings.database.queue_path,
                QueueConfig {
                    default_max_attempts: settings.queue.default_max_attempts,
                    default_backoff_base_ms: settings.queue.backoff_base_ms,
                    lease_ms: settings.queue.lease_ms,
                    completed_retention_secs: settings.queue.completed_retention_secs,
                    completed_retention_count: settings.queue.completed_retention_count,
                    failed_retention_secs: settings.queue.failed_retention_secs,
                    ..Default::default()
                },
            )
            .await?,
        );

        let provider: Arc<dyn VoiceProvider> = Arc::new(TwilioClient::new(TwilioConfig {
            account_sid: settings.telephony.account_sid.clone(),
            auth_token: settings.telephony.auth_token.clone(),
            api_base_url: settings.telephony.api_base_url.clone(),
            request_timeout: Duration::from_secs(15),
        })?);

        let connector: Arc<dyn RealtimeConnector> = Arc::new(TungsteniteConnector::new(
            settings.realtime.url.clone(),
            settings.realtime.api_key.clone(),
            Duration::from_secs(settings.realtime.connect_deadline_secs),
        ));

        let scheduler = Arc::new(CallScheduler::new(queue.clone(), stores.leads.clone()));

        let worker_ctx = Arc::new(WorkerContext {
            queue: queue.clone(),
            leads: stores.leads.clone(),
            provider,
            placement: CallPlacement {
                from_number: settings.telephony.from_number.clone(),
                public_base_url: settings.server.public_base_url.clone(),
                record: settings.telephony.record,
                timeout_secs: settings.telephony.timeout_secs,
            },
        });
        let pool = Arc::new(WorkerPool::new(
            worker_ctx,
            WorkerPoolConfig {
                concurrency: settings.worker.concurrency,
                rate_limit_count: settings.worker.rate_limit_count,
                rate_limit_window: Duration::from_secs(settings.worker.rate_limit_window_secs),
                ..Default::default()
            },
        ));

        let state = Self {
            settings: Arc::new(settings),
            stores,
            queue,
            scheduler,
            sessions: SessionRegistry::new(),
            connector,
        };

        Ok((state, pool))
    }
}
