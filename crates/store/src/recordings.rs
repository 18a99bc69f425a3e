//! Call recording descriptors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use dialcast_core::{CallRecording, RecordingStatus};

use crate::StoreError;

/// A recording descriptor about to be attached to a call.
///
/// The object-storage upload itself is the recording collaborator's job;
/// only the resulting descriptor is persisted here.
#[derive(Debug, Clone)]
pub struct AttachRecording {
    pub call_sid: String,
    pub recording_sid: String,
    pub status: RecordingStatus,
    pub duration_secs: Option<i64>,
    pub size_bytes: Option<i64>,
    pub storage_path: Option<String>,
}

/// Recording store trait for abstraction
#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Attach (or refresh) a recording descriptor, keyed by recording SID.
    /// Replaying the same callback is a no-op merge.
    async fn attach(&self, recording: &AttachRecording) -> Result<(), StoreError>;
    async fn get_for_call(&self, call_sid: &str) -> Result<Vec<CallRecording>, StoreError>;
}

#[derive(sqlx::FromRow)]
struct RecordingRow {
    id: i64,
    call_sid: String,
    recording_sid: String,
    status: String,
    duration_secs: Option<i64>,
    size_bytes: Option<i64>,
    storage_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordingRow> for CallRecording {
    type Error = StoreError;

    fn try_from(row: RecordingRow) -> Result<Self, Self::Error> {
        let status: RecordingStatus = row.status.parse().map_err(StoreError::InvalidData)?;
        Ok(CallRecording {
            id: row.id,
            call_sid: row.call_sid,
            recording_sid: row.recording_sid,
            status,
            duration_secs: row.duration_secs,
            size_bytes: row.size_bytes,
            storage_path: row.storage_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// SQLite implementation of the recording store
pub struct SqliteRecordingStore {
    pool: SqlitePool,
}

impl SqliteRecordingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordingStore for SqliteRecordingStore {
    async fn attach(&self, recording: &AttachRecording) -> Result<(), StoreError> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO call_recordings (
                call_sid, recording_sid, status, duration_secs, size_bytes,
                storage_path, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(recording_sid) DO UPDATE SET
                status = excluded.status,
                duration_secs = COALESCE(excluded.duration_secs, call_recordings.duration_secs),
                size_bytes = COALESCE(excluded.size_bytes, call_recordings.size_bytes),
                storage_path = COALESCE(excluded.storage_path, call_recordings.storage_path),
                updated_at = excluded.updated_at",
        )
        .bind(&recording.call_sid)
        .bind(&recording.recording_sid)
        .bind(recording.status.as_str())
        .bind(recording.duration_secs)
        .bind(recording.size_bytes)
        .bind(&recording.storage_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            call_sid = %recording.call_sid,
            recording_sid = %recording.recording_sid,
            status = %recording.status.as_str(),
            "Recording attached"
        );
        Ok(())
    }

    async fn get_for_call(&self, call_sid: &str) -> Result<Vec<CallRecording>, StoreError> {
        let rows = sqlx::query_as::<_, RecordingRow>(
            "SELECT id, call_sid, recording_sid, status, duration_secs, size_bytes, \
             storage_path, created_at, updated_at \
             FROM call_recordings WHERE call_sid = ? ORDER BY created_at ASC",
        )
        .bind(call_sid)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CallRecording::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    fn completed(call_sid: &str, recording_sid: &str) -> AttachRecording {
        AttachRecording {
            call_sid: call_sid.to_string(),
            recording_sid: recording_sid.to_string(),
            status: RecordingStatus::Completed,
            duration_secs: Some(31),
            size_bytes: None,
            storage_path: None,
        }
    }

    #[tokio::test]
    async fn test_attach_and_replay() {
        let store = SqliteRecordingStore::new(test_pool().await);

        store.attach(&completed("CA1", "RE1")).await.unwrap();
        store.attach(&completed("CA1", "RE1")).await.unwrap();

        let recordings = store.get_for_call("CA1").await.unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].status, RecordingStatus::Completed);
        assert_eq!(recordings[0].duration_secs, Some(31));
    }

    #[tokio::test]
    async fn test_replay_merges_storage_path() {
        let store = SqliteRecordingStore::new(test_pool().await);

        store.attach(&completed("CA2", "RE2")).await.unwrap();

        let mut uploaded = completed("CA2", "RE2");
        uploaded.storage_path = Some("recordings/CA2/RE2.wav".to_string());
        store.attach(&uploaded).await.unwrap();

        let recordings = store.get_for_call("CA2").await.unwrap();
        assert_eq!(
            recordings[0].storage_path.as_deref(),
            Some("recordings/CA2/RE2.wav")
        );
    }

    #[tokio::test]
    async fn test_single_completed_recording_per_call() {
        let store = SqliteRecordingStore::new(test_pool().await);

        store.attach(&completed("CA3", "RE3")).await.unwrap();
        let err = store.attach(&completed("CA3", "RE4")).await;
        assert!(err.is_err());
    }
}
