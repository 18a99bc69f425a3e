//! Worker pool for the dialcast engine
//!
//! Long-running consumers pull jobs from the queue under a shared
//! token-bucket rate limit and dispatch on job family:
//! `place-call` initiates one outbound call, `refill-from-leads` turns
//! uncontacted leads into place-call jobs.

pub mod place_call;
pub mod pool;
pub mod rate_limit;
pub mod refill;

pub use place_call::{PlaceCallHandler, PlaceCallMetadata, PlaceCallPayload};
pub use pool::{CallPlacement, WorkerContext, WorkerPool, WorkerPoolConfig};
pub use rate_limit::DispatchLimiter;
pub use refill::{schedule_refill_calls, RefillHandler, RefillPayload, RefillReport};

use thiserror::Error;

/// Worker errors.
///
/// `is_terminal` tells the queue whether to retry: validation problems and
/// provider rejections fail the job outright, everything else backs off.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Job canceled")]
    Canceled,

    #[error(transparent)]
    Telephony(#[from] dialcast_telephony::TelephonyError),

    #[error(transparent)]
    Store(#[from] dialcast_store::StoreError),

    #[error(transparent)]
    Queue(#[from] dialcast_queue::QueueError),
}

impl WorkerError {
    /// Whether retrying could possibly help
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkerError::InvalidPayload(_) | WorkerError::Canceled => true,
            WorkerError::Telephony(e) => e.is_terminal(),
            WorkerError::Store(_) | WorkerError::Queue(_) => false,
        }
    }
}
