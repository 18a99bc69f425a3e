//! Call event persistence
//!
//! One row per call SID, merged from however many webhooks arrive and in
//! whatever order they arrive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use dialcast_core::{CallDirection, CallEvent, CallEventUpdate, CallStatus};

use crate::StoreError;

/// Call event store trait for abstraction
#[async_trait]
pub trait CallEventStore: Send + Sync {
    /// Merge an observation into the row for its call SID, creating the
    /// row when absent. Non-null fields win; a terminal status is never
    /// regressed to a non-terminal one.
    async fn upsert(&self, update: &CallEventUpdate) -> Result<(), StoreError>;
    async fn get(&self, call_sid: &str) -> Result<Option<CallEvent>, StoreError>;
    /// Create a minimal `in-progress` row when none exists yet, so rows
    /// referencing the call SID have something to point at.
    async fn ensure_exists(&self, call_sid: &str) -> Result<(), StoreError>;
}

#[derive(sqlx::FromRow)]
struct CallEventRow {
    call_sid: String,
    status: String,
    direction: Option<String>,
    from_number: Option<String>,
    to_number: Option<String>,
    duration_secs: Option<i64>,
    call_duration_secs: Option<i64>,
    recording_url: Option<String>,
    recording_sid: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallEventRow> for CallEvent {
    type Error = StoreError;

    fn try_from(row: CallEventRow) -> Result<Self, Self::Error> {
        let status: CallStatus = row.status.parse().map_err(StoreError::InvalidData)?;
        let direction = row
            .direction
            .as_deref()
            .map(str::parse::<CallDirection>)
            .transpose()
            .map_err(StoreError::InvalidData)?;

        Ok(CallEvent {
            call_sid: row.call_sid,
            status,
            direction,
            from_number: row.from_number,
            to_number: row.to_number,
            duration_secs: row.duration_secs,
            call_duration_secs: row.call_duration_secs,
            recording_url: row.recording_url,
            recording_sid: row.recording_sid,
            last_event_at: row.last_event_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TERMINAL_SET: &str = "('completed','failed','canceled','no-answer','busy')";

/// SQLite implementation of the call event store
pub struct SqliteCallEventStore {
    pool: SqlitePool,
}

impl SqliteCallEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallEventStore for SqliteCallEventStore {
    async fn upsert(&self, update: &CallEventUpdate) -> Result<(), StoreError> {
        let now = Utc::now();
        let status = update.status.map(|s| s.as_str());

        // Field merge on conflict: incoming non-null fields win, and a
        // stored terminal status beats an incoming non-terminal one. The
        // raw status parameter is rebound in the update clause so that an
        // absent status leaves the stored one untouched.
        let sql = format!(
            "INSERT INTO call_events (
                call_sid, status, direction, from_number, to_number,
                duration_secs, call_duration_secs, recording_url, recording_sid,
                last_event_at, created_at, updated_at
            ) VALUES (?, COALESCE(?, 'queued'), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(call_sid) DO UPDATE SET
                status = CASE
                    WHEN call_events.status IN {TERMINAL_SET}
                         AND COALESCE(?, call_events.status) NOT IN {TERMINAL_SET}
                    THEN call_events.status
                    ELSE COALESCE(?, call_events.status)
                END,
                direction = COALESCE(excluded.direction, call_events.direction),
                from_number = COALESCE(excluded.from_number, call_events.from_number),
                to_number = COALESCE(excluded.to_number, call_events.to_number),
                duration_secs = COALESCE(excluded.duration_secs, call_events.duration_secs),
                call_duration_secs = COALESCE(excluded.call_duration_secs, call_events.call_duration_secs),
                recording_url = COALESCE(excluded.recording_url, call_events.recording_url),
                recording_sid = COALESCE(excluded.recording_sid, call_events.recording_sid),
                last_event_at = COALESCE(excluded.last_event_at, call_events.last_event_at),
                updated_at = excluded.updated_at"
        );

        sqlx::query(&sql)
            .bind(&update.call_sid)
            .bind(status)
            .bind(update.direction.map(|d| d.as_str()))
            .bind(&update.from_number)
            .bind(&update.to_number)
            .bind(update.duration_secs)
            .bind(update.call_duration_secs)
            .bind(&update.recording_url)
            .bind(&update.recording_sid)
            .bind(update.last_event_at)
            .bind(now)
            .bind(now)
            .bind(status)
            .bind(status)
            .execute(&self.pool)
            .await?;

        tracing::debug!(call_sid = %update.call_sid, status = ?status, "Call event upserted");
        Ok(())
    }

    async fn get(&self, call_sid: &str) -> Result<Option<CallEvent>, StoreError> {
        let row = sqlx::query_as::<_, CallEventRow>(
            "SELECT call_sid, status, direction, from_number, to_number, duration_secs, \
             call_duration_secs, recording_url, recording_sid, last_event_at, created_at, \
             updated_at FROM call_events WHERE call_sid = ?",
        )
        .bind(call_sid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CallEvent::try_from).transpose()
    }

    async fn ensure_exists(&self, call_sid: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO call_events (call_sid, status, created_at, updated_at) \
             VALUES (?, 'in-progress', ?, ?)",
        )
        .bind(call_sid)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
