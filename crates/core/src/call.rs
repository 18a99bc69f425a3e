//! Call event and recording records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-reported call status.
///
/// The terminal set matters for upsert semantics: once a call reaches a
/// terminal status, a late webhook carrying an earlier status must not
/// regress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Canceled,
    NoAnswer,
    Busy,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Canceled => "canceled",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Busy => "busy",
        }
    }

    /// Whether this status ends the call's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Canceled
                | CallStatus::NoAnswer
                | CallStatus::Busy
        )
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CallStatus::Queued),
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "in-progress" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "failed" => Ok(CallStatus::Failed),
            "canceled" => Ok(CallStatus::Canceled),
            "no-answer" => Ok(CallStatus::NoAnswer),
            "busy" => Ok(CallStatus::Busy),
            other => Err(format!("unknown call status: {other}")),
        }
    }
}

/// Direction of a call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

impl std::str::FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Providers report the API-initiated leg as "outbound-api" and
        // dialed child legs as "outbound-dial"; both are outbound here.
        match s {
            "inbound" => Ok(CallDirection::Inbound),
            s if s.starts_with("outbound") => Ok(CallDirection::Outbound),
            other => Err(format!("unknown call direction: {other}")),
        }
    }
}

/// One row per call, keyed by the provider-issued call SID.
///
/// Webhooks arrive out of order and may be redelivered; the row is the
/// merged view of everything seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub call_sid: String,
    pub status: CallStatus,
    pub direction: Option<CallDirection>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub duration_secs: Option<i64>,
    pub call_duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A partial call-event observation to merge into the stored row.
///
/// `None` fields are left untouched by the upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallEventUpdate {
    pub call_sid: String,
    pub status: Option<CallStatus>,
    pub direction: Option<CallDirection>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub duration_secs: Option<i64>,
    pub call_duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl CallEventUpdate {
    pub fn new(call_sid: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_to_number(mut self, to: impl Into<String>) -> Self {
        self.to_number = Some(to.into());
        self
    }
}

/// Lifecycle of a provider recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingStatus {
    InProgress,
    Completed,
    Failed,
    Absent,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::InProgress => "in-progress",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Absent => "absent",
        }
    }
}

impl std::str::FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-progress" => Ok(RecordingStatus::InProgress),
            "completed" => Ok(RecordingStatus::Completed),
            "failed" => Ok(RecordingStatus::Failed),
            "absent" => Ok(RecordingStatus::Absent),
            other => Err(format!("unknown recording status: {other}")),
        }
    }
}

/// Descriptor of a completed (or pending) call recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecording {
    pub id: i64,
    pub call_sid: String,
    pub recording_sid: String,
    pub status: RecordingStatus,
    pub duration_secs: Option<i64>,
    pub size_bytes: Option<i64>,
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::NoAnswer.is_terminal());
        assert!(CallStatus::Busy.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(CallStatus::NoAnswer.as_str(), "no-answer");
        assert_eq!("in-progress".parse::<CallStatus>().unwrap(), CallStatus::InProgress);
    }

    #[test]
    fn test_direction_provider_variants() {
        assert_eq!("outbound-api".parse::<CallDirection>().unwrap(), CallDirection::Outbound);
        assert_eq!("outbound-dial".parse::<CallDirection>().unwrap(), CallDirection::Outbound);
        assert_eq!("inbound".parse::<CallDirection>().unwrap(), CallDirection::Inbound);
        assert!("sideways".parse::<CallDirection>().is_err());
    }
}
