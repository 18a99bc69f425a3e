//! Row store schema bootstrap

use sqlx::SqlitePool;

use crate::StoreError;

const CREATE_LEADS: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id                 TEXT PRIMARY KEY,
    name               TEXT,
    email              TEXT,
    phone              TEXT,
    company            TEXT,
    source             TEXT,
    status             TEXT NOT NULL DEFAULT 'new',
    priority           TEXT NOT NULL DEFAULT 'medium',
    notes              TEXT,
    metadata           TEXT,
    call_sid           TEXT UNIQUE,
    last_contacted_at  TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
)
"#;

const CREATE_CALL_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS call_events (
    call_sid            TEXT PRIMARY KEY,
    status              TEXT NOT NULL,
    direction           TEXT,
    from_number         TEXT,
    to_number           TEXT,
    duration_secs       INTEGER,
    call_duration_secs  INTEGER,
    recording_url       TEXT,
    recording_sid       TEXT,
    last_event_at       TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
)
"#;

const CREATE_TRANSCRIPTS: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_transcripts (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    call_sid             TEXT NOT NULL,
    role                 TEXT NOT NULL,
    content              TEXT NOT NULL,
    provider_message_id  TEXT,
    latency_metrics      TEXT,
    created_at           TEXT NOT NULL
)
"#;

const CREATE_RECORDINGS: &str = r#"
CREATE TABLE IF NOT EXISTS call_recordings (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    call_sid       TEXT NOT NULL,
    recording_sid  TEXT NOT NULL UNIQUE,
    status         TEXT NOT NULL,
    duration_secs  INTEGER,
    size_bytes     INTEGER,
    storage_path   TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
)
"#;

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY,
    email          TEXT NOT NULL UNIQUE,
    password_hash  TEXT NOT NULL,
    display_name   TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_leads_phone ON leads(phone)",
    "CREATE INDEX IF NOT EXISTS idx_leads_status_call_sid ON leads(status) WHERE call_sid IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_call_events_to_number ON call_events(to_number)",
    "CREATE INDEX IF NOT EXISTS idx_transcripts_call_sid ON conversation_transcripts(call_sid)",
    // Retransmitted transcript events dedup on (call_sid, provider_message_id).
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_transcripts_message_id \
     ON conversation_transcripts(call_sid, provider_message_id) \
     WHERE provider_message_id IS NOT NULL",
    // At most one completed recording per call.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_completed \
     ON call_recordings(call_sid) WHERE status = 'completed'",
];

/// Create all tables and indexes if they do not exist
pub async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
    for stmt in [
        CREATE_LEADS,
        CREATE_CALL_EVENTS,
        CREATE_TRANSCRIPTS,
        CREATE_RECORDINGS,
        CREATE_USERS,
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    for stmt in CREATE_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_create_tables_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        create_tables(&pool).await.unwrap();
        create_tables(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
