//! Row store for the dialcast engine
//!
//! Provides persistent storage for:
//! - Leads (the contact database driving outbound calls)
//! - Call events (one merged row per call SID)
//! - Conversation transcripts
//! - Call recordings
//! - Users (read/written by the out-of-scope auth collaborator)
//!
//! Every write path is idempotent and safe to replay on webhook retries.

pub mod calls;
pub mod leads;
pub mod linkage;
pub mod recordings;
pub mod schema;
pub mod transcripts;
pub mod users;

pub use calls::{CallEventStore, SqliteCallEventStore};
pub use leads::{LeadStore, SqliteLeadStore};
pub use linkage::link_lead;
pub use recordings::{AttachRecording, RecordingStore, SqliteRecordingStore};
pub use transcripts::{SqliteTranscriptStore, TranscriptStore};
pub use users::{NewUser, SqliteUserStore, User, UserStore};

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Call SID {call_sid} is already linked to another lead")]
    DuplicateCallSid { call_sid: String },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the underlying failure is a unique-constraint violation
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

/// Open (creating if missing) the row store database
pub async fn connect(path: &str) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidData(format!("cannot create {}: {e}", parent.display())))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
        .map_err(|e| StoreError::InvalidData(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Combined row store with all entity stores
pub struct Stores {
    pub leads: Arc<SqliteLeadStore>,
    pub calls: Arc<SqliteCallEventStore>,
    pub transcripts: Arc<SqliteTranscriptStore>,
    pub recordings: Arc<SqliteRecordingStore>,
    pub users: Arc<SqliteUserStore>,
}

/// Initialize the row store: open the pool, ensure the schema, wire the
/// entity stores.
pub async fn init(path: &str) -> Result<Stores, StoreError> {
    let pool = connect(path).await?;
    schema::create_tables(&pool).await?;

    tracing::info!(path, "Row store ready");

    Ok(Stores {
        leads: Arc::new(SqliteLeadStore::new(pool.clone())),
        calls: Arc::new(SqliteCallEventStore::new(pool.clone())),
        transcripts: Arc::new(SqliteTranscriptStore::new(pool.clone())),
        recordings: Arc::new(SqliteRecordingStore::new(pool.clone())),
        users: Arc::new(SqliteUserStore::new(pool)),
    })
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // A single connection keeps every handle on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::create_tables(&pool).await.unwrap();
    pool
}
