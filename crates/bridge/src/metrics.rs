//! Per-turn latency tracking
//!
//! One clock per session, reset after every `response.done`. Intervals are
//! anchored on the caller's speech stopping, which is what conversational
//! latency is measured against.

use std::time::Instant;

use dialcast_core::TurnMetrics;

/// Stamps for the turn in flight
#[derive(Debug, Default)]
pub struct TurnClock {
    speech_started: Option<Instant>,
    speech_stopped: Option<Instant>,
    committed: Option<Instant>,
    response_created: Option<Instant>,
    first_audio: Option<Instant>,
}

impl TurnClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_speech_started(&mut self) {
        self.speech_started = Some(Instant::now());
    }

    pub fn on_speech_stopped(&mut self) {
        self.speech_stopped = Some(Instant::now());
    }

    pub fn on_committed(&mut self) {
        self.committed = Some(Instant::now());
    }

    pub fn on_response_created(&mut self) {
        self.response_created = Some(Instant::now());
    }

    /// Stamp the first audio chunk of the turn; returns whether this was
    /// the first.
    pub fn on_first_audio(&mut self) -> bool {
        if self.first_audio.is_none() {
            self.first_audio = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Metrics as observed so far, without closing the turn
    pub fn snapshot(&self) -> TurnMetrics {
        self.build(None)
    }

    /// Close the turn at `response.done`: compute the summary and reset
    pub fn finish(&mut self) -> TurnMetrics {
        let metrics = self.build(Some(Instant::now()));
        *self = Self::default();
        metrics
    }

    fn build(&self, done: Option<Instant>) -> TurnMetrics {
        let span_ms = |from: Option<Instant>, to: Option<Instant>| -> Option<u64> {
            match (from, to) {
                (Some(from), Some(to)) if to >= from => {
                    Some(to.duration_since(from).as_millis() as u64)
                }
                _ => None,
            }
        };

        TurnMetrics {
            total_turn_ms: span_ms(self.speech_stopped, done),
            speech_to_commit_ms: span_ms(self.speech_stopped, self.committed),
            response_create_ms: span_ms(self.committed, self.response_created),
            time_to_first_audio_ms: span_ms(self.speech_stopped, self.first_audio),
            streaming_duration_ms: span_ms(self.first_audio, done),
        }
    }
}
