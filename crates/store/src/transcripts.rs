//! Transcript persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use dialcast_core::{NewTranscript, TranscriptEntry, TranscriptRole, TurnMetrics};

use crate::StoreError;

/// Transcript store trait for abstraction
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Append an utterance. Returns `true` when a row was written, `false`
    /// when the entry deduplicated against an earlier delivery of the same
    /// provider message id.
    async fn append(&self, entry: &NewTranscript) -> Result<bool, StoreError>;
    /// All entries for a call in timestamp order
    async fn list_for_call(&self, call_sid: &str) -> Result<Vec<TranscriptEntry>, StoreError>;
    async fn count_for_call(&self, call_sid: &str) -> Result<u64, StoreError>;
}

#[derive(sqlx::FromRow)]
struct TranscriptRow {
    id: i64,
    call_sid: String,
    role: String,
    content: String,
    provider_message_id: Option<String>,
    latency_metrics: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TranscriptRow> for TranscriptEntry {
    type Error = StoreError;

    fn try_from(row: TranscriptRow) -> Result<Self, Self::Error> {
        let role: TranscriptRole = row.role.parse().map_err(StoreError::InvalidData)?;
        let latency_metrics: Option<TurnMetrics> = row
            .latency_metrics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(TranscriptEntry {
            id: row.id,
            call_sid: row.call_sid,
            role,
            content: row.content,
            provider_message_id: row.provider_message_id,
            latency_metrics,
            created_at: row.created_at,
        })
    }
}

/// SQLite implementation of the transcript store
pub struct SqliteTranscriptStore {
    pool: SqlitePool,
}

impl SqliteTranscriptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn append(&self, entry: &NewTranscript) -> Result<bool, StoreError> {
        // A transcript can land before any status webhook; give it a call
        // event row to reference.
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO call_events (call_sid, status, created_at, updated_at) \
             VALUES (?, 'in-progress', ?, ?)",
        )
        .bind(&entry.call_sid)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let metrics = entry
            .latency_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO conversation_transcripts \
             (call_sid, role, content, provider_message_id, latency_metrics, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.call_sid)
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(&entry.provider_message_id)
        .bind(metrics)
        .bind(entry.ts)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::debug!(
                call_sid = %entry.call_sid,
                role = %entry.role.as_str(),
                "Transcript appended"
            );
        } else {
            tracing::debug!(
                call_sid = %entry.call_sid,
                message_id = ?entry.provider_message_id,
                "Transcript deduplicated"
            );
        }
        Ok(inserted)
    }

    async fn list_for_call(&self, call_sid: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let rows = sqlx::query_as::<_, TranscriptRow>(
            "SELECT id, call_sid, role, content, provider_message_id, latency_metrics, created_at \
             FROM conversation_transcripts WHERE call_sid = ? \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(call_sid)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TranscriptEntry::try_from).collect()
    }

    async fn count_for_call(&self, call_sid: &str) -> Result<u64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversation_transcripts WHERE call_sid = ?")
                .bind(call_sid)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0 as u64)
    }
}
