//! Durable job queue for the dialcast engine
//!
//! Jobs live in the queue's own SQLite keyspace, independent of the row
//! store. The queue provides priority + delay dispatch with leases,
//! exponential-backoff retries, cron repeat patterns, atomic bulk insert,
//! and retention sweeps. Job state in the database is the source of truth;
//! nothing here survives only in memory except the pause flag.

pub mod cron_util;
pub mod job;
pub mod store;

pub use job::{
    BulkJob, EnqueueOptions, Job, JobCounts, JobFamily, JobPriority, JobState,
};
pub use store::{CancelOutcome, JobQueue, QueueConfig};

use thiserror::Error;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}
