//! Voice provider REST client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use dialcast_core::CallStatus;

use crate::TelephonyError;

/// An outbound call about to be initiated
#[derive(Debug, Clone)]
pub struct InitiateCall {
    pub to: String,
    pub from: String,
    /// URL the provider fetches for call instructions once answered
    pub answer_url: String,
    pub status_callback_url: String,
    pub recording_callback_url: String,
    pub record: bool,
    /// Ring timeout before the provider gives up
    pub timeout_secs: u32,
}

/// Provider acknowledgement of an initiated call
#[derive(Debug, Clone)]
pub struct CallInitiated {
    pub call_sid: String,
    pub status: CallStatus,
}

/// Voice provider trait for abstraction
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn initiate_call(&self, req: &InitiateCall) -> Result<CallInitiated, TelephonyError>;
}

/// Twilio REST client configuration
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub api_base_url: String,
    pub request_timeout: Duration,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base_url: "https://api.twilio.com".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Twilio implementation of the voice provider
#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Result<Self, TelephonyError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TelephonyError::InvalidResponse(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl VoiceProvider for TwilioClient {
    async fn initiate_call(&self, req: &InitiateCall) -> Result<CallInitiated, TelephonyError> {
        let timeout = req.timeout_secs.to_string();
        let mut form: Vec<(&str, &str)> = vec![
            ("To", req.to.as_str()),
            ("From", req.from.as_str()),
            ("Url", req.answer_url.as_str()),
            ("StatusCallback", req.status_callback_url.as_str()),
            ("StatusCallbackEvent", "initiated"),
            ("StatusCallbackEvent", "ringing"),
            ("StatusCallbackEvent", "answered"),
            ("StatusCallbackEvent", "completed"),
            ("Timeout", timeout.as_str()),
        ];
        if req.record {
            form.push(("Record", "true"));
            form.push(("RecordingStatusCallback", req.recording_callback_url.as_str()));
        }

        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();

        if status.is_server_error() {
            return Err(TelephonyError::Transient(format!(
                "provider returned {status}"
            )));
        }

        if status.is_client_error() {
            let message = response
                .json::<ApiError>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("provider returned {status}"));
            return Err(TelephonyError::Terminal(message));
        }

        let resource: CallResource = response
            .json()
            .await
            .map_err(|e| TelephonyError::InvalidResponse(e.to_string()))?;

        let call_status = resource
            .status
            .parse::<CallStatus>()
            .unwrap_or(CallStatus::Queued);

        tracing::info!(
            call_sid = %resource.sid,
            to = %req.to,
            status = %call_status.as_str(),
            "Outbound call initiated"
        );

        Ok(CallInitiated {
            call_sid: resource.sid,
            status: call_status,
        })
    }
}
