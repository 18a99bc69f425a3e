//! Lead persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use dialcast_core::{Lead, LeadPriority, LeadStatus};

use crate::StoreError;

/// Lead store trait for abstraction
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn create(&self, lead: &Lead) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Lead>, StoreError>;
    async fn find_by_call_sid(&self, call_sid: &str) -> Result<Option<Lead>, StoreError>;
    /// Most recent lead with this phone number and no call linked yet
    async fn find_latest_unlinked_by_phone(&self, phone: &str) -> Result<Option<Lead>, StoreError>;
    /// Leads eligible for a refill pass: `status = new`, no call SID
    async fn list_uncontacted(&self, limit: u32) -> Result<Vec<Lead>, StoreError>;
    /// Record an outbound call against a lead: set the call SID, mark it
    /// contacted, stamp `last_contacted_at`
    async fn mark_contacted(
        &self,
        id: &str,
        call_sid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Claim a call SID for a lead without touching its lifecycle fields.
    /// Fails with [`StoreError::DuplicateCallSid`] when another lead
    /// already holds the SID.
    async fn assign_call_sid(&self, id: &str, call_sid: &str) -> Result<(), StoreError>;
}

#[derive(sqlx::FromRow)]
struct LeadRow {
    id: String,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    company: Option<String>,
    source: Option<String>,
    status: String,
    priority: String,
    notes: Option<String>,
    metadata: Option<String>,
    call_sid: Option<String>,
    last_contacted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = StoreError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        let status: LeadStatus = row.status.parse().map_err(StoreError::InvalidData)?;
        let priority: LeadPriority = row.priority.parse().map_err(StoreError::InvalidData)?;
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Lead {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            company: row.company,
            source: row.source,
            status,
            priority,
            notes: row.notes,
            metadata,
            call_sid: row.call_sid,
            last_contacted_at: row.last_contacted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_LEAD: &str = "SELECT id, name, email, phone, company, source, status, priority, \
     notes, metadata, call_sid, last_contacted_at, created_at, updated_at FROM leads";

/// SQLite implementation of the lead store
pub struct SqliteLeadStore {
    pool: SqlitePool,
}

impl SqliteLeadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn create(&self, lead: &Lead) -> Result<(), StoreError> {
        let metadata = lead
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO leads (
                id, name, email, phone, company, source, status, priority,
                notes, metadata, call_sid, last_contacted_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lead.id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.company)
        .bind(&lead.source)
        .bind(lead.status.as_str())
        .bind(lead.priority.as_str())
        .bind(&lead.notes)
        .bind(metadata)
        .bind(&lead.call_sid)
        .bind(lead.last_contacted_at)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(lead_id = %lead.id, "Lead created");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!("{SELECT_LEAD} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Lead::try_from).transpose()
    }

    async fn find_by_call_sid(&self, call_sid: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!("{SELECT_LEAD} WHERE call_sid = ?"))
            .bind(call_sid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Lead::try_from).transpose()
    }

    async fn find_latest_unlinked_by_phone(&self, phone: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "{SELECT_LEAD} WHERE phone = ? AND call_sid IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lead::try_from).transpose()
    }

    async fn list_uncontacted(&self, limit: u32) -> Result<Vec<Lead>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "{SELECT_LEAD} WHERE status = 'new' AND call_sid IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lead::try_from).collect()
    }

    async fn mark_contacted(
        &self,
        id: &str,
        call_sid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE leads SET call_sid = ?, status = 'contacted', \
             last_contacted_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(call_sid)
        .bind(at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if StoreError::is_unique_violation(&e) {
                StoreError::DuplicateCallSid {
                    call_sid: call_sid.to_string(),
                }
            } else {
                StoreError::Database(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Lead", id));
        }

        tracing::debug!(lead_id = %id, call_sid = %call_sid, "Lead marked contacted");
        Ok(())
    }

    async fn assign_call_sid(&self, id: &str, call_sid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE leads SET call_sid = ?, updated_at = ? WHERE id = ?")
            .bind(call_sid)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::DuplicateCallSid {
                        call_sid: call_sid.to_string(),
                    }
                } else {
                    StoreError::Database(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Lead", id));
        }

        Ok(())
    }
}
