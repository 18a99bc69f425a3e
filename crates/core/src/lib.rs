//! Core types for the dialcast call orchestration engine
//!
//! This crate provides the plain data records shared by every other crate:
//! - Leads and their lifecycle
//! - Call events and recordings
//! - Conversation transcripts and per-turn latency metrics

pub mod call;
pub mod lead;
pub mod transcript;

pub use call::{CallDirection, CallEvent, CallEventUpdate, CallRecording, CallStatus, RecordingStatus};
pub use lead::{Lead, LeadPriority, LeadStatus};
pub use transcript::{NewTranscript, TranscriptEntry, TranscriptRole, TurnMetrics};
