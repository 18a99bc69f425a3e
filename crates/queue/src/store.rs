//! SQLite-backed job queue

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::cron_util;
use crate::job::{BulkJob, EnqueueOptions, Job, JobCounts, JobFamily, JobPriority, JobState};
use crate::QueueError;

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stream this queue handle dispatches from
    pub stream: String,
    pub default_max_attempts: u32,
    pub default_backoff_base_ms: u64,
    /// Lease duration while a job is active
    pub lease_ms: u64,
    pub completed_retention_secs: u64,
    pub completed_retention_count: u32,
    pub failed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream: "calls".to_string(),
            default_max_attempts: 3,
            default_backoff_base_ms: 2_000,
            lease_ms: 60_000,
            completed_retention_secs: 7 * 24 * 3600,
            completed_retention_count: 1_000,
            failed_retention_secs: 30 * 24 * 3600,
        }
    }
}

/// Outcome of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was not active and has been removed
    Removed,
    /// The job is active; cancellation was signaled cooperatively
    Signaled,
    NotFound,
}

const CREATE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id                TEXT PRIMARY KEY,
    stream            TEXT NOT NULL,
    family            TEXT NOT NULL,
    payload           TEXT NOT NULL,
    priority          INTEGER NOT NULL DEFAULT 2,
    state             TEXT NOT NULL DEFAULT 'waiting',
    scheduled_at      TEXT NOT NULL,
    repeat_pattern    TEXT,
    parent_id         TEXT,
    attempts_made     INTEGER NOT NULL DEFAULT 0,
    max_attempts      INTEGER NOT NULL DEFAULT 3,
    backoff_base_ms   INTEGER NOT NULL DEFAULT 2000,
    lease_expires_at  TEXT,
    progress          INTEGER NOT NULL DEFAULT 0,
    cancel_requested  INTEGER NOT NULL DEFAULT 0,
    last_error        TEXT,
    result            TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    finished_at       TEXT
)
"#;

const CREATE_JOB_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs(stream, state, priority, scheduled_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_repeat ON jobs(stream, parent_id) WHERE repeat_pattern IS NOT NULL",
];

const JOB_COLUMNS: &str = "id, stream, family, payload, priority, state, scheduled_at, \
     repeat_pattern, parent_id, attempts_made, max_attempts, backoff_base_ms, lease_expires_at, \
     progress, cancel_requested, last_error, result, created_at, updated_at, finished_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    stream: String,
    family: String,
    payload: String,
    priority: i64,
    state: String,
    scheduled_at: DateTime<Utc>,
    repeat_pattern: Option<String>,
    parent_id: Option<String>,
    attempts_made: i64,
    max_attempts: i64,
    backoff_base_ms: i64,
    #[allow(dead_code)]
    lease_expires_at: Option<DateTime<Utc>>,
    progress: i64,
    cancel_requested: i64,
    last_error: Option<String>,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let family: JobFamily = row.family.parse().map_err(QueueError::InvalidData)?;
        let state: JobState = row.state.parse().map_err(QueueError::InvalidData)?;
        let priority = JobPriority::from_tier(row.priority)
            .ok_or_else(|| QueueError::InvalidData(format!("bad priority tier {}", row.priority)))?;
        let payload = serde_json::from_str(&row.payload)?;
        let result = row.result.as_deref().map(serde_json::from_str).transpose()?;

        Ok(Job {
            id: row.id,
            stream: row.stream,
            family,
            payload,
            priority,
            state,
            scheduled_at: row.scheduled_at,
            repeat_pattern: row.repeat_pattern,
            parent_id: row.parent_id,
            attempts_made: row.attempts_made as u32,
            max_attempts: row.max_attempts as u32,
            backoff_base_ms: row.backoff_base_ms as u64,
            progress: row.progress as u8,
            cancel_requested: row.cancel_requested != 0,
            last_error: row.last_error,
            result,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

/// Durable job queue over one named stream
pub struct JobQueue {
    pool: SqlitePool,
    config: QueueConfig,
    paused: AtomicBool,
}

impl JobQueue {
    /// Open (creating if missing) the queue database
    pub async fn open(path: &str, config: QueueConfig) -> Result<Self, QueueError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| QueueError::InvalidData(format!("cannot create {}: {e}", parent.display())))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| QueueError::InvalidData(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, config).await
    }

    /// Build a queue over an existing pool
    pub async fn with_pool(pool: SqlitePool, config: QueueConfig) -> Result<Self, QueueError> {
        sqlx::query(CREATE_JOBS).execute(&pool).await?;
        for stmt in CREATE_JOB_INDEXES {
            sqlx::query(stmt).execute(&pool).await?;
        }

        Ok(Self {
            pool,
            config,
            paused: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &str {
        &self.config.stream
    }

    /// Enqueue one job; returns its id.
    ///
    /// A caller-supplied `job_id` makes the enqueue idempotent: a second
    /// call with the same id is a no-op returning the same id.
    pub async fn enqueue(
        &self,
        family: JobFamily,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let mut tx = self.pool.begin().await?;
        let id = self.insert_job(&mut tx, family, payload, &opts).await?;
        tx.commit().await?;

        tracing::debug!(job_id = %id, family = %family.as_str(), "Job enqueued");
        Ok(id)
    }

    /// Enqueue a batch atomically: either every job is inserted or none.
    pub async fn bulk_enqueue(&self, jobs: Vec<BulkJob>) -> Result<Vec<String>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(jobs.len());

        for job in &jobs {
            let id = self
                .insert_job(&mut tx, job.family, job.payload.clone(), &job.opts)
                .await?;
            ids.push(id);
        }

        tx.commit().await?;
        tracing::info!(count = ids.len(), "Bulk enqueue committed");
        Ok(ids)
    }

    async fn insert_job(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        family: JobFamily,
        payload: serde_json::Value,
        opts: &EnqueueOptions,
    ) -> Result<String, QueueError> {
        let now = Utc::now();

        // A repeating carrier waits for its first fire time; a plain job
        // honors its delay.
        let (state, scheduled_at) = if let Some(pattern) = &opts.repeat_pattern {
            (JobState::Delayed, cron_util::next_fire_after(pattern, now)?)
        } else if opts.delay_ms > 0 {
            (
                JobState::Delayed,
                now + Duration::milliseconds(opts.delay_ms as i64),
            )
        } else {
            (JobState::Waiting, now)
        };

        let id = opts
            .job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        sqlx::query(
            "INSERT OR IGNORE INTO jobs (
                id, stream, family, payload, priority, state, scheduled_at,
                repeat_pattern, attempts_made, max_attempts, backoff_base_ms,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&self.config.stream)
        .bind(family.as_str())
        .bind(serde_json::to_string(&payload)?)
        .bind(opts.priority.tier())
        .bind(state.as_str())
        .bind(scheduled_at)
        .bind(&opts.repeat_pattern)
        .bind(opts.max_attempts.unwrap_or(self.config.default_max_attempts))
        .bind(opts.backoff_base_ms.unwrap_or(self.config.default_backoff_base_ms) as i64)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(id)
    }

    /// Claim the next ready job, if any.
    ///
    /// The transition to `active` and the lease grant are one atomic
    /// statement: exactly one consumer wins a given job. Returns `None`
    /// while paused or when nothing is ready.
    pub async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        if self.is_paused() {
            return Ok(None);
        }

        let now = Utc::now();

        // Ripe delayed jobs become waiting first, so listings stay honest.
        sqlx::query(
            "UPDATE jobs SET state = 'waiting', updated_at = ? \
             WHERE stream = ? AND state = 'delayed' AND scheduled_at <= ?",
        )
        .bind(now)
        .bind(&self.config.stream)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let lease_until = now + Duration::milliseconds(self.config.lease_ms as i64);
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs SET state = 'active', lease_expires_at = ?, \
                 attempts_made = attempts_made + 1, updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE stream = ? AND state = 'waiting' AND scheduled_at <= ?
                 ORDER BY priority ASC, scheduled_at ASC, created_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(lease_until)
        .bind(now)
        .bind(&self.config.stream)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = Job::try_from(row)?;

        // A repeating carrier spawns its successor the moment it dispatches,
        // so a missed tick yields one delayed run rather than a cascade.
        if let Some(pattern) = &job.repeat_pattern {
            self.spawn_repeat_child(&job, pattern).await?;
        }

        Ok(Some(job))
    }

    async fn spawn_repeat_child(&self, parent: &Job, pattern: &str) -> Result<(), QueueError> {
        let now = Utc::now();
        let next_fire = cron_util::next_fire_after(pattern, now)?;
        let root = parent.parent_id.clone().unwrap_or_else(|| parent.id.clone());
        let child_id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO jobs (
                id, stream, family, payload, priority, state, scheduled_at,
                repeat_pattern, parent_id, attempts_made, max_attempts,
                backoff_base_ms, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'delayed', ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(&child_id)
        .bind(&parent.stream)
        .bind(parent.family.as_str())
        .bind(serde_json::to_string(&parent.payload)?)
        .bind(parent.priority.tier())
        .bind(next_fire)
        .bind(pattern)
        .bind(&root)
        .bind(parent.max_attempts)
        .bind(parent.backoff_base_ms as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            parent_id = %parent.id,
            child_id = %child_id,
            next_fire = %next_fire,
            "Repeat child scheduled"
        );
        Ok(())
    }

    /// Renew the lease of an active job, optionally updating progress
    pub async fn renew_lease(&self, id: &str, progress: Option<u8>) -> Result<(), QueueError> {
        let now = Utc::now();
        let lease_until = now + Duration::milliseconds(self.config.lease_ms as i64);

        sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?, progress = COALESCE(?, progress), \
             updated_at = ? WHERE id = ? AND state = 'active'",
        )
        .bind(lease_until)
        .bind(progress.map(|p| p as i64))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark an active job completed
    pub async fn complete(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let result = result.map(|r| serde_json::to_string(&r)).transpose()?;

        sqlx::query(
            "UPDATE jobs SET state = 'completed', progress = 100, result = ?, \
             lease_expires_at = NULL, finished_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'active'",
        )
        .bind(result)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %id, "Job completed");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// With attempts left (and a retryable error) the job goes back to
    /// `delayed` under exponential backoff; otherwise it lands in `failed`.
    pub async fn fail(&self, id: &str, error: &str, terminal: bool) -> Result<(), QueueError> {
        let Some(job) = self.get(id).await? else {
            return Err(QueueError::NotFound(id.to_string()));
        };

        let now = Utc::now();
        let exhausted = job.attempts_made >= job.max_attempts;

        if terminal || exhausted {
            sqlx::query(
                "UPDATE jobs SET state = 'failed', last_error = ?, lease_expires_at = NULL, \
                 finished_at = ?, updated_at = ? WHERE id = ? AND state = 'active'",
            )
            .bind(error)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

            tracing::warn!(job_id = %id, error, terminal, "Job failed");
        } else {
            let retry_at = now + Duration::milliseconds(job.backoff_delay_ms() as i64);
            sqlx::query(
                "UPDATE jobs SET state = 'delayed', scheduled_at = ?, last_error = ?, \
                 lease_expires_at = NULL, updated_at = ? WHERE id = ? AND state = 'active'",
            )
            .bind(retry_at)
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

            tracing::info!(
                job_id = %id,
                attempt = job.attempts_made,
                retry_at = %retry_at,
                "Job attempt failed, retry scheduled"
            );
        }

        Ok(())
    }

    /// Return crashed jobs to the queue.
    ///
    /// An expired lease means the owning worker died mid-run; the job goes
    /// back to `waiting` and the interrupted attempt is not counted.
    pub async fn requeue_expired(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET state = 'waiting', lease_expires_at = NULL, \
             attempts_made = MAX(attempts_made - 1, 0), updated_at = ? \
             WHERE stream = ? AND state = 'active' AND lease_expires_at < ?",
        )
        .bind(now)
        .bind(&self.config.stream)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Requeued jobs with expired leases");
        }
        Ok(count)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    /// Cancel a job. Non-active jobs are removed; an active job gets a
    /// cooperative cancellation flag the worker checks between calls.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, QueueError> {
        let removed = sqlx::query("DELETE FROM jobs WHERE id = ? AND state != 'active'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if removed.rows_affected() > 0 {
            tracing::info!(job_id = %id, "Job removed");
            return Ok(CancelOutcome::Removed);
        }

        let signaled = sqlx::query(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ? \
             WHERE id = ? AND state = 'active'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if signaled.rows_affected() > 0 {
            tracing::info!(job_id = %id, "Cancellation signaled to active job");
            return Ok(CancelOutcome::Signaled);
        }

        Ok(CancelOutcome::NotFound)
    }

    /// Whether cooperative cancellation was requested for a job
    pub async fn is_cancel_requested(&self, id: &str) -> Result<bool, QueueError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT cancel_requested FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some_and(|(flag,)| flag != 0))
    }

    /// Requeue a failed job for one more pass
    pub async fn retry(&self, id: &str) -> Result<bool, QueueError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET state = 'waiting', scheduled_at = ?, last_error = NULL, \
             cancel_requested = 0, finished_at = NULL, \
             max_attempts = MAX(max_attempts, attempts_made + 1), updated_at = ? \
             WHERE id = ? AND state = 'failed'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List jobs in a state, oldest first
    pub async fn list(
        &self,
        state: JobState,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Job>, QueueError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE stream = ? AND state = ? \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?"
        ))
        .bind(&self.config.stream)
        .bind(state.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Pending repeat carriers (registered schedules)
    pub async fn list_repeating(&self) -> Result<Vec<Job>, QueueError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE stream = ? AND repeat_pattern IS NOT NULL \
             AND state IN ('waiting', 'delayed') \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&self.config.stream)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Remove a repeat schedule by its root id; pending carriers in the
    /// chain are deleted so no further children spawn.
    pub async fn remove_repeating(&self, root_id: &str) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE stream = ? AND repeat_pattern IS NOT NULL \
             AND state IN ('waiting', 'delayed') AND (id = ? OR parent_id = ?)",
        )
        .bind(&self.config.stream)
        .bind(root_id)
        .bind(root_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts per state
    pub async fn stats(&self) -> Result<JobCounts, QueueError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs WHERE stream = ? GROUP BY state")
                .bind(&self.config.stream)
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            let count = count as u64;
            match state.parse::<JobState>().map_err(QueueError::InvalidData)? {
                JobState::Waiting => counts.waiting = count,
                JobState::Delayed => counts.delayed = count,
                JobState::Active => counts.active = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    /// Evict finished jobs older than `grace_ms`, up to `limit`
    pub async fn clean(
        &self,
        grace_ms: u64,
        limit: u32,
        state: JobState,
    ) -> Result<u64, QueueError> {
        if !state.is_terminal() {
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::milliseconds(grace_ms as i64);
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN (
                 SELECT id FROM jobs WHERE stream = ? AND state = ? AND finished_at <= ?
                 ORDER BY finished_at ASC LIMIT ?
             )",
        )
        .bind(&self.config.stream)
        .bind(state.as_str())
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Retention sweep: age out completed and failed jobs, and cap the
    /// number of completed jobs kept (newest survive).
    pub async fn sweep_retention(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut removed = 0u64;

        let completed_cutoff = now - Duration::seconds(self.config.completed_retention_secs as i64);
        removed += sqlx::query(
            "DELETE FROM jobs WHERE stream = ? AND state = 'completed' AND finished_at <= ?",
        )
        .bind(&self.config.stream)
        .bind(completed_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        removed += sqlx::query(
            "DELETE FROM jobs WHERE stream = ? AND state = 'completed' AND id NOT IN (
                 SELECT id FROM jobs WHERE stream = ? AND state = 'completed'
                 ORDER BY finished_at DESC LIMIT ?
             )",
        )
        .bind(&self.config.stream)
        .bind(&self.config.stream)
        .bind(self.config.completed_retention_count)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed_cutoff = now - Duration::seconds(self.config.failed_retention_secs as i64);
        removed += sqlx::query(
            "DELETE FROM jobs WHERE stream = ? AND state = 'failed' AND finished_at <= ?",
        )
        .bind(&self.config.stream)
        .bind(failed_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if removed > 0 {
            tracing::info!(removed, "Retention sweep evicted jobs");
        }
        Ok(removed)
    }

    /// Pause dispatch. Active jobs run to completion; nothing new is claimed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!(stream = %self.config.stream, "Queue paused");
    }

    /// Resume dispatch
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!(stream = %self.config.stream, "Queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
