//! Conversation transcript records and turn latency metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptRole::User => "user",
            TranscriptRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for TranscriptRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TranscriptRole::User),
            "assistant" => Ok(TranscriptRole::Assistant),
            other => Err(format!("unknown transcript role: {other}")),
        }
    }
}

/// An utterance within a call, ordered by timestamp.
///
/// `provider_message_id` is the realtime peer's item id when it supplied
/// one; a retransmitted event with the same id yields at most one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: i64,
    pub call_sid: String,
    pub role: TranscriptRole,
    pub content: String,
    pub provider_message_id: Option<String>,
    pub latency_metrics: Option<TurnMetrics>,
    pub created_at: DateTime<Utc>,
}

/// A transcript row about to be written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTranscript {
    pub call_sid: String,
    pub role: TranscriptRole,
    pub content: String,
    pub provider_message_id: Option<String>,
    pub latency_metrics: Option<TurnMetrics>,
    pub ts: DateTime<Utc>,
}

impl NewTranscript {
    pub fn new(
        call_sid: impl Into<String>,
        role: TranscriptRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_sid: call_sid.into(),
            role,
            content: content.into(),
            provider_message_id: None,
            latency_metrics: None,
            ts: Utc::now(),
        }
    }

    pub fn with_provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = Some(id.into());
        self
    }

    pub fn with_metrics(mut self, metrics: TurnMetrics) -> Self {
        self.latency_metrics = Some(metrics);
        self
    }
}

/// Latency breakdown for one conversational turn.
///
/// All durations are milliseconds; a field is `None` when the event that
/// would close the interval was never observed in that turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Caller stopped speaking to response fully done
    pub total_turn_ms: Option<u64>,
    /// Caller stopped speaking to input buffer committed
    pub speech_to_commit_ms: Option<u64>,
    /// Commit to the peer acknowledging response creation
    pub response_create_ms: Option<u64>,
    /// Caller stopped speaking to the first synthesized audio chunk
    pub time_to_first_audio_ms: Option<u64>,
    /// First audio chunk to response done
    pub streaming_duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transcript_builder() {
        let entry = NewTranscript::new("CA1", TranscriptRole::User, "hello")
            .with_provider_message_id("item_1");
        assert_eq!(entry.call_sid, "CA1");
        assert_eq!(entry.role, TranscriptRole::User);
        assert_eq!(entry.provider_message_id.as_deref(), Some("item_1"));
        assert!(entry.latency_metrics.is_none());
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&TranscriptRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!("user".parse::<TranscriptRole>().unwrap(), TranscriptRole::User);
    }
}
