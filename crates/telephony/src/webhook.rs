//! Provider webhook payloads
//!
//! Status and recording callbacks arrive form-encoded with the provider's
//! PascalCase field names, numbers as strings included. Normalization into
//! core types happens here; handlers answer 200 regardless of what these
//! contain, so a malformed field degrades to `None` instead of failing the
//! request.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use dialcast_core::{CallDirection, CallEventUpdate, CallStatus, RecordingStatus};

/// Status callback webhook payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCallbackPayload {
    pub call_sid: String,
    pub call_status: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub call_duration: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_sid: Option<String>,
}

impl StatusCallbackPayload {
    /// Normalize into a call event update for the row store
    pub fn normalize(&self) -> CallEventUpdate {
        let status = self.call_status.parse::<CallStatus>().ok();
        if status.is_none() {
            tracing::warn!(
                call_sid = %self.call_sid,
                raw = %self.call_status,
                "Unrecognized call status in webhook"
            );
        }

        let direction = self
            .direction
            .as_deref()
            .and_then(|d| d.parse::<CallDirection>().ok());

        let last_event_at = self
            .timestamp
            .as_deref()
            .and_then(parse_provider_timestamp)
            .or_else(|| Some(Utc::now()));

        CallEventUpdate {
            call_sid: self.call_sid.clone(),
            status,
            direction,
            from_number: self.from.clone(),
            to_number: self.to.clone(),
            duration_secs: self.duration.as_deref().and_then(|d| d.parse().ok()),
            call_duration_secs: self.call_duration.as_deref().and_then(|d| d.parse().ok()),
            recording_url: self.recording_url.clone(),
            recording_sid: self.recording_sid.clone(),
            last_event_at,
        }
    }
}

/// Recording callback webhook payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordingCallbackPayload {
    pub call_sid: String,
    pub recording_sid: String,
    pub recording_status: String,
    #[serde(default)]
    pub recording_duration: Option<String>,
    #[serde(default)]
    pub recording_channels: Option<String>,
    #[serde(default)]
    pub recording_source: Option<String>,
}

impl RecordingCallbackPayload {
    pub fn status(&self) -> RecordingStatus {
        self.recording_status
            .parse()
            .unwrap_or(RecordingStatus::Failed)
    }

    /// Only a completed recording triggers downstream processing
    pub fn is_completed(&self) -> bool {
        self.status() == RecordingStatus::Completed
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.recording_duration.as_deref().and_then(|d| d.parse().ok())
    }
}

/// Providers send RFC 2822 timestamps ("Fri, 12 Jul 2024 18:31:04 +0000")
fn parse_provider_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_payload() -> StatusCallbackPayload {
        StatusCallbackPayload {
            call_sid: "CA123".to_string(),
            call_status: "completed".to_string(),
            direction: Some("outbound-api".to_string()),
            from: Some("+15550001111".to_string()),
            to: Some("+15551234567".to_string()),
            duration: Some("42".to_string()),
            call_duration: Some("45".to_string()),
            timestamp: Some("Fri, 12 Jul 2024 18:31:04 +0000".to_string()),
            recording_url: None,
            recording_sid: None,
        }
    }

    #[test]
    fn test_normalize_status_callback() {
        let update = status_payload().normalize();

        assert_eq!(update.call_sid, "CA123");
        assert_eq!(update.status, Some(CallStatus::Completed));
        assert_eq!(update.direction, Some(CallDirection::Outbound));
        assert_eq!(update.duration_secs, Some(42));
        assert_eq!(update.call_duration_secs, Some(45));
        assert!(update.last_event_at.is_some());
    }

    #[test]
    fn test_normalize_tolerates_garbage_fields() {
        let mut payload = status_payload();
        payload.call_status = "something-new".to_string();
        payload.duration = Some("NaN".to_string());
        payload.timestamp = Some("yesterday".to_string());

        let update = payload.normalize();
        assert_eq!(update.status, None);
        assert_eq!(update.duration_secs, None);
        // Falls back to receipt time so ordering survives.
        assert!(update.last_event_at.is_some());
    }

    #[test]
    fn test_form_decoding_pascal_case() {
        let body = "CallSid=CA9&CallStatus=ringing&Direction=outbound-dial&To=%2B15551234567";
        let payload: StatusCallbackPayload = serde_urlencoded::from_str(body).unwrap();

        assert_eq!(payload.call_sid, "CA9");
        assert_eq!(payload.call_status, "ringing");
        assert_eq!(payload.to.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn test_recording_payload_gates_on_completed() {
        let completed = RecordingCallbackPayload {
            call_sid: "CA1".to_string(),
            recording_sid: "RE1".to_string(),
            recording_status: "completed".to_string(),
            recording_duration: Some("31".to_string()),
            recording_channels: Some("1".to_string()),
            recording_source: Some("RecordVerb".to_string()),
        };
        assert!(completed.is_completed());
        assert_eq!(completed.duration_secs(), Some(31));

        let in_progress = RecordingCallbackPayload {
            recording_status: "in-progress".to_string(),
            ..completed.clone()
        };
        assert!(!in_progress.is_completed());
    }
}
