//! Telephony gateway
//!
//! Adapter to the external voice provider: outbound call initiation,
//! status/recording webhook normalization, and the TwiML answer document
//! that tells the provider to open a media stream to the bridge.

pub mod client;
pub mod twiml;
pub mod webhook;

pub use client::{CallInitiated, InitiateCall, TwilioClient, TwilioConfig, VoiceProvider};
pub use twiml::{render_answer, AnswerParams};
pub use webhook::{RecordingCallbackPayload, StatusCallbackPayload};

use thiserror::Error;

/// Telephony errors.
///
/// The transient/terminal split drives the queue's retry decision: a 5xx
/// or timeout retries under backoff, a 4xx (bad number, bad credentials)
/// fails the job outright.
#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider rejected the request: {0}")]
    Terminal(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl TelephonyError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TelephonyError::Terminal(_))
    }
}

impl From<reqwest::Error> for TelephonyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            TelephonyError::Transient(e.to_string())
        } else {
            TelephonyError::InvalidResponse(e.to_string())
        }
    }
}
