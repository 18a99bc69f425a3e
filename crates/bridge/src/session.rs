//! Per-call bridge session
//!
//! One session per provider media stream, running as one logical task.
//! The session owns both peers: the provider leg arrives as channels
//! pumped by the WebSocket handler, the AI leg is dialed here through a
//! [`RealtimeConnector`]. Audio is relayed verbatim in both directions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use dialcast_core::{NewTranscript, TranscriptRole, TurnMetrics};
use dialcast_store::{link_lead, CallEventStore, LeadStore, TranscriptStore};

use crate::metrics::TurnClock;
use crate::provider::{MediaTrack, ProviderMessage, ProviderOutbound};
use crate::realtime::{
    ClientEvent, ConversationItem, RealtimeConnector, RealtimeEvent, RealtimePeer,
    RealtimeSessionConfig,
};
use crate::BridgeError;

/// Name of the mark frame sent when a session degrades, so the caller
/// hears a terminator instead of dead air
pub const FAILED_MARK: &str = "bridge-terminated";

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Ready,
    Streaming,
    Failed,
    Closing,
}

/// Per-session options, read from the media stream query parameters and
/// the realtime configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub voice: String,
    /// Speak before the caller does
    pub speak_first: bool,
    pub initial_message: Option<String>,
    pub max_response_tokens: u32,
    /// Session-level cap on connect and reconnect attempts
    pub max_connect_attempts: u32,
    /// Linear pre-connect backoff unit (attempt n waits n × this)
    pub connect_backoff: Duration,
    /// Pause before a mid-call reconnect
    pub reconnect_pause: Duration,
    /// Error events tolerated before the session degrades
    pub max_error_events: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            speak_first: false,
            initial_message: None,
            max_response_tokens: 4_096,
            max_connect_attempts: 3,
            connect_backoff: Duration::from_secs(1),
            reconnect_pause: Duration::from_secs(2),
            max_error_events: 5,
        }
    }
}

/// Stores the session writes through
#[derive(Clone)]
pub struct BridgeStores {
    pub transcripts: Arc<dyn TranscriptStore>,
    pub leads: Arc<dyn LeadStore>,
    pub calls: Arc<dyn CallEventStore>,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub failed: bool,
    pub transcripts_written: u64,
}

enum Control {
    Continue,
    Fail,
}

/// One live bridge session
pub struct BridgeSession {
    call_sid: String,
    stream_sid: String,
    opts: SessionOptions,
    state: SessionState,
    stores: BridgeStores,
    provider_tx: mpsc::Sender<ProviderOutbound>,
    clock: TurnClock,
    connect_attempts: u32,
    error_count: u32,
    spoke_first: bool,
    link_attempted: bool,
    transcripts_written: u64,
}

impl BridgeSession {
    pub fn new(
        call_sid: impl Into<String>,
        stream_sid: impl Into<String>,
        opts: SessionOptions,
        stores: BridgeStores,
        provider_tx: mpsc::Sender<ProviderOutbound>,
    ) -> Self {
        Self {
            call_sid: call_sid.into(),
            stream_sid: stream_sid.into(),
            opts,
            state: SessionState::Init,
            stores,
            provider_tx,
            clock: TurnClock::new(),
            connect_attempts: 0,
            error_count: 0,
            spoke_first: false,
            link_attempted: false,
            transcripts_written: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Consumes provider frames from `provider_rx` until the provider leg
    /// stops, the AI leg closes, or the session degrades past recovery.
    pub async fn run(
        mut self,
        connector: Arc<dyn RealtimeConnector>,
        mut provider_rx: mpsc::Receiver<ProviderMessage>,
    ) -> SessionOutcome {
        tracing::info!(
            call_sid = %self.call_sid,
            stream_sid = %self.stream_sid,
            speak_first = self.opts.speak_first,
            "Bridge session starting"
        );

        let mut peer = match self.connect_with_backoff(connector.as_ref()).await {
            Ok(peer) => peer,
            Err(e) => {
                tracing::error!(call_sid = %self.call_sid, error = %e, "Realtime connect exhausted");
                self.enter_failed().await;
                return self.close(None).await;
            }
        };

        if let Err(e) = self.configure_peer(&mut peer).await {
            tracing::error!(call_sid = %self.call_sid, error = %e, "Session configuration failed");
            self.enter_failed().await;
            return self.close(Some(peer)).await;
        }

        self.state = SessionState::Streaming;

        loop {
            tokio::select! {
                msg = provider_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            match self.handle_provider_message(&mut peer, msg).await {
                                Ok(()) => {}
                                Err(BridgeError::ProviderClosed) => {
                                    tracing::info!(call_sid = %self.call_sid, "Provider sent stop");
                                    break;
                                }
                                Err(e) => {
                                    tracing::debug!(call_sid = %self.call_sid, error = %e, "AI leg dropped mid-relay");
                                    match self.reconnect(connector.as_ref(), &mut peer).await {
                                        Control::Continue => continue,
                                        Control::Fail => {
                                            self.enter_failed().await;
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                        None => {
                            tracing::info!(call_sid = %self.call_sid, "Provider stream ended");
                            break;
                        }
                    }
                }
                event = peer.recv() => {
                    match event {
                        Ok(Some(event)) => {
                            match self.handle_ai_event(&mut peer, event).await {
                                Control::Continue => {}
                                Control::Fail => {
                                    self.enter_failed().await;
                                    break;
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::info!(call_sid = %self.call_sid, "Realtime peer closed normally");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(call_sid = %self.call_sid, error = %e, "Realtime peer dropped");
                            match self.reconnect(connector.as_ref(), &mut peer).await {
                                Control::Continue => {}
                                Control::Fail => {
                                    self.enter_failed().await;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        self.close(Some(peer)).await
    }

    /// Dial the realtime peer, honoring the session-level attempt cap and
    /// the linear 1s/2s/3s pre-attempt backoff.
    async fn connect_with_backoff(
        &mut self,
        connector: &dyn RealtimeConnector,
    ) -> Result<Box<dyn RealtimePeer>, BridgeError> {
        self.state = SessionState::Connecting;

        while self.connect_attempts < self.opts.max_connect_attempts {
            self.connect_attempts += 1;

            match connector.connect().await {
                Ok(peer) => return Ok(peer),
                Err(e) => {
                    tracing::warn!(
                        call_sid = %self.call_sid,
                        attempt = self.connect_attempts,
                        max = self.opts.max_connect_attempts,
                        error = %e,
                        "Realtime connect attempt failed"
                    );

                    if self.connect_attempts < self.opts.max_connect_attempts {
                        tokio::time::sleep(self.opts.connect_backoff * self.connect_attempts).await;
                    }
                }
            }
        }

        Err(BridgeError::Connect(format!(
            "exhausted {} connect attempts",
            self.opts.max_connect_attempts
        )))
    }

    /// READY: push the session config, and inject the opener when the
    /// bridge is supposed to speak first.
    async fn configure_peer(&mut self, peer: &mut Box<dyn RealtimePeer>) -> Result<(), BridgeError> {
        self.state = SessionState::Ready;

        let config =
            RealtimeSessionConfig::for_bridge(self.opts.voice.clone(), self.opts.max_response_tokens);
        peer.send(ClientEvent::SessionUpdate { session: config }).await?;

        if self.opts.speak_first && !self.spoke_first {
            let opener = self
                .opts
                .initial_message
                .clone()
                .unwrap_or_else(|| "Hello! How can I help you today?".to_string());

            peer.send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::assistant_text(opener),
            })
            .await?;
            peer.send(ClientEvent::ResponseCreate).await?;
            self.spoke_first = true;

            tracing::debug!(call_sid = %self.call_sid, "Speak-first opener injected");
        }

        Ok(())
    }

    /// Mid-call recovery after an abnormal AI-side close
    async fn reconnect(
        &mut self,
        connector: &dyn RealtimeConnector,
        peer: &mut Box<dyn RealtimePeer>,
    ) -> Control {
        if self.connect_attempts >= self.opts.max_connect_attempts {
            tracing::error!(call_sid = %self.call_sid, "No reconnect attempts left");
            return Control::Fail;
        }

        tokio::time::sleep(self.opts.reconnect_pause).await;

        match self.connect_with_backoff(connector).await {
            Ok(mut fresh) => {
                // The new socket reuses the session config; the opener is
                // not replayed.
                if let Err(e) = self.configure_peer(&mut fresh).await {
                    tracing::error!(call_sid = %self.call_sid, error = %e, "Reconfigure after reconnect failed");
                    return Control::Fail;
                }
                *peer = fresh;
                self.state = SessionState::Streaming;
                tracing::info!(call_sid = %self.call_sid, "Realtime peer reconnected");
                Control::Continue
            }
            Err(e) => {
                tracing::error!(call_sid = %self.call_sid, error = %e, "Reconnect failed");
                Control::Fail
            }
        }
    }

    /// Relay one provider frame. Inbound-track audio is forwarded verbatim
    /// to the AI input buffer; outbound-track frames are the provider
    /// echoing our own audio and are dropped.
    async fn handle_provider_message(
        &mut self,
        peer: &mut Box<dyn RealtimePeer>,
        msg: ProviderMessage,
    ) -> Result<(), BridgeError> {
        match msg {
            ProviderMessage::Media { media, .. } => {
                if media.track == MediaTrack::Inbound {
                    peer.send(ClientEvent::InputAudioBufferAppend {
                        audio: media.payload,
                    })
                    .await?;
                }
            }
            ProviderMessage::Mark { mark, .. } => {
                tracing::debug!(call_sid = %self.call_sid, mark = %mark.name, "Provider mark acknowledged");
            }
            ProviderMessage::Stop { .. } => {
                return Err(BridgeError::ProviderClosed);
            }
            ProviderMessage::Connected { .. } | ProviderMessage::Start { .. } => {}
        }
        Ok(())
    }

    /// React to one AI event: turn-taking, audio relay, transcripts.
    async fn handle_ai_event(
        &mut self,
        peer: &mut Box<dyn RealtimePeer>,
        event: RealtimeEvent,
    ) -> Control {
        match event {
            RealtimeEvent::SpeechStarted => {
                // Barge-in: server-side turn detection heard the caller.
                self.clock.on_speech_started();
                tracing::debug!(call_sid = %self.call_sid, "Caller speech started");
            }
            RealtimeEvent::SpeechStopped => {
                self.clock.on_speech_stopped();
            }
            RealtimeEvent::InputBufferCommitted => {
                self.clock.on_committed();
                if let Err(e) = peer.send(ClientEvent::ResponseCreate).await {
                    tracing::warn!(call_sid = %self.call_sid, error = %e, "response.create failed");
                    return self.count_error();
                }
            }
            RealtimeEvent::ResponseCreated => {
                self.clock.on_response_created();
            }
            RealtimeEvent::AudioDelta { delta, .. } => {
                if self.clock.on_first_audio() {
                    metrics::counter!("dialcast_bridge_turns_total").increment(1);
                }
                let frame = ProviderOutbound::media(self.stream_sid.clone(), delta);
                if self.provider_tx.send(frame).await.is_err() {
                    // Provider pump is gone; nothing left to play to.
                    return Control::Fail;
                }
            }
            RealtimeEvent::AudioDone => {}
            RealtimeEvent::InputTranscriptionCompleted { item_id, transcript } => {
                self.record_transcript(TranscriptRole::User, transcript, item_id, None)
                    .await;
            }
            RealtimeEvent::AudioTranscriptDone { transcript, item_id } => {
                let snapshot = self.clock.snapshot();
                self.record_transcript(
                    TranscriptRole::Assistant,
                    transcript,
                    item_id,
                    Some(snapshot),
                )
                .await;
            }
            RealtimeEvent::ResponseDone => {
                let summary = self.clock.finish();
                self.log_turn_summary(&summary);
            }
            RealtimeEvent::ErrorEvent { error } => {
                let message = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(call_sid = %self.call_sid, error = %message, "Realtime error event");
                return self.count_error();
            }
            RealtimeEvent::SessionCreated
            | RealtimeEvent::SessionUpdated
            | RealtimeEvent::Unknown => {}
        }

        Control::Continue
    }

    fn count_error(&mut self) -> Control {
        self.error_count += 1;
        if self.error_count >= self.opts.max_error_events {
            tracing::error!(
                call_sid = %self.call_sid,
                errors = self.error_count,
                "Error budget exhausted"
            );
            Control::Fail
        } else {
            Control::Continue
        }
    }

    async fn record_transcript(
        &mut self,
        role: TranscriptRole,
        content: String,
        item_id: Option<String>,
        turn_metrics: Option<TurnMetrics>,
    ) {
        if content.trim().is_empty() {
            return;
        }

        let mut entry = NewTranscript::new(&self.call_sid, role, content);
        entry.provider_message_id = item_id;
        entry.latency_metrics = turn_metrics;

        match self.stores.transcripts.append(&entry).await {
            Ok(true) => {
                self.transcripts_written += 1;
                metrics::counter!("dialcast_transcripts_total").increment(1);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(call_sid = %self.call_sid, error = %e, "Transcript write failed");
            }
        }

        // First transcript for a call links it to the lead that was dialed.
        if !self.link_attempted {
            self.link_attempted = true;
            link_lead(
                self.stores.leads.as_ref(),
                self.stores.calls.as_ref(),
                &self.call_sid,
            )
            .await;
        }
    }

    fn log_turn_summary(&self, summary: &TurnMetrics) {
        tracing::info!(
            call_sid = %self.call_sid,
            total_turn_ms = ?summary.total_turn_ms,
            speech_to_commit_ms = ?summary.speech_to_commit_ms,
            response_create_ms = ?summary.response_create_ms,
            time_to_first_audio_ms = ?summary.time_to_first_audio_ms,
            streaming_duration_ms = ?summary.streaming_duration_ms,
            "Turn complete"
        );

        if let Some(total) = summary.total_turn_ms {
            metrics::histogram!("dialcast_bridge_turn_total_ms").record(total as f64);
        }
        if let Some(first_audio) = summary.time_to_first_audio_ms {
            metrics::histogram!("dialcast_bridge_first_audio_ms").record(first_audio as f64);
        }
    }

    /// FAILED: play the terminator so the caller hears an ending, not a
    /// hang. The provider-side call itself still completes normally.
    async fn enter_failed(&mut self) {
        self.state = SessionState::Failed;
        metrics::counter!("dialcast_bridge_sessions_failed_total").increment(1);

        let _ = self
            .provider_tx
            .send(ProviderOutbound::Clear {
                stream_sid: self.stream_sid.clone(),
            })
            .await;
        let _ = self
            .provider_tx
            .send(ProviderOutbound::mark(self.stream_sid.clone(), FAILED_MARK))
            .await;

        tracing::warn!(call_sid = %self.call_sid, "Session degraded, terminator sent");
    }

    /// CLOSING: close the AI socket with a normal closure and release.
    async fn close(mut self, peer: Option<Box<dyn RealtimePeer>>) -> SessionOutcome {
        let failed = self.state == SessionState::Failed;
        self.state = SessionState::Closing;

        if let Some(mut peer) = peer {
            if let Err(e) = peer.close().await {
                tracing::debug!(call_sid = %self.call_sid, error = %e, "Realtime close");
            }
        }

        tracing::info!(
            call_sid = %self.call_sid,
            failed,
            transcripts = self.transcripts_written,
            "Bridge session closed"
        );

        SessionOutcome {
            failed,
            transcripts_written: self.transcripts_written,
        }
    }
}
