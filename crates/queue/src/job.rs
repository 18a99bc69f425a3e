//! Job records and enqueue options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two job families the worker pool understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobFamily {
    PlaceCall,
    RefillFromLeads,
}

impl JobFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFamily::PlaceCall => "place-call",
            JobFamily::RefillFromLeads => "refill-from-leads",
        }
    }
}

impl std::str::FromStr for JobFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "place-call" => Ok(JobFamily::PlaceCall),
            "refill-from-leads" => Ok(JobFamily::RefillFromLeads),
            other => Err(format!("unknown job family: {other}")),
        }
    }
}

/// Dispatch priority. Lower tier dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Fixed tier mapping: high→1, normal→2, low→3
    pub fn tier(&self) -> i64 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    pub fn from_tier(tier: i64) -> Option<Self> {
        match tier {
            1 => Some(JobPriority::High),
            2 => Some(JobPriority::Normal),
            3 => Some(JobPriority::Low),
            _ => None,
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            other => Err(format!("unknown job priority: {other}")),
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Options accepted by `enqueue`
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: JobPriority,
    pub delay_ms: u64,
    /// Cron expression; the job becomes a repeating carrier
    pub repeat_pattern: Option<String>,
    /// Idempotency key; enqueueing the same id twice yields one job
    pub job_id: Option<String>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_repeat(mut self, pattern: impl Into<String>) -> Self {
        self.repeat_pattern = Some(pattern.into());
        self
    }

    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }
}

/// One entry of a bulk enqueue
#[derive(Debug, Clone)]
pub struct BulkJob {
    pub family: JobFamily,
    pub payload: serde_json::Value,
    pub opts: EnqueueOptions,
}

/// A job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub stream: String,
    pub family: JobFamily,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub state: JobState,
    pub scheduled_at: DateTime<Utc>,
    pub repeat_pattern: Option<String>,
    /// Root carrier id for repeat chains
    pub parent_id: Option<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub progress: u8,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Backoff delay before the next attempt: `base · 2^(attempts-1)`
    pub fn backoff_delay_ms(&self) -> u64 {
        let exponent = self.attempts_made.saturating_sub(1).min(16);
        self.backoff_base_ms.saturating_mul(1u64 << exponent)
    }
}

/// Per-state job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}
