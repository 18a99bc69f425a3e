//! Integration tests for the bridge session state machine
//!
//! The AI peer is scripted through channels; persistence runs against the
//! real stores on an in-memory database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use tokio::time::timeout;

use dialcast_bridge::{
    BridgeError, BridgeSession, BridgeStores, ClientEvent, MediaPayload, MediaTrack,
    ProviderMessage, ProviderOutbound, RealtimeConnector, RealtimeEvent, RealtimePeer,
    SessionOptions,
};
use dialcast_core::{CallEventUpdate, CallStatus, Lead, TranscriptRole};
use dialcast_store::{
    schema, CallEventStore, LeadStore, SqliteCallEventStore, SqliteLeadStore,
    SqliteTranscriptStore, TranscriptStore,
};

type ScriptedEvent = Result<Option<RealtimeEvent>, BridgeError>;

struct MockPeer {
    incoming: mpsc::Receiver<ScriptedEvent>,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
}

#[async_trait]
impl RealtimePeer for MockPeer {
    async fn send(&mut self, event: ClientEvent) -> Result<(), BridgeError> {
        self.sent.lock().push(event);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<RealtimeEvent>, BridgeError> {
        match self.incoming.recv().await {
            Some(result) => result,
            // Script exhausted and sender dropped: normal closure.
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[derive(Default)]
struct MockConnector {
    peers: Mutex<VecDeque<MockPeer>>,
    attempts: AtomicU32,
}

impl MockConnector {
    fn with_peer(peer: MockPeer) -> Arc<Self> {
        let connector = Self::default();
        connector.peers.lock().push_back(peer);
        Arc::new(connector)
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimePeer>, BridgeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.peers
            .lock()
            .pop_front()
            .map(|peer| Box::new(peer) as Box<dyn RealtimePeer>)
            .ok_or_else(|| BridgeError::Connect("endpoint unreachable".to_string()))
    }
}

struct Harness {
    stores: BridgeStores,
    leads: Arc<SqliteLeadStore>,
    calls: Arc<SqliteCallEventStore>,
    transcripts: Arc<SqliteTranscriptStore>,
}

async fn harness() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::create_tables(&pool).await.unwrap();

    let leads = Arc::new(SqliteLeadStore::new(pool.clone()));
    let calls = Arc::new(SqliteCallEventStore::new(pool.clone()));
    let transcripts = Arc::new(SqliteTranscriptStore::new(pool));

    Harness {
        stores: BridgeStores {
            transcripts: transcripts.clone(),
            leads: leads.clone(),
            calls: calls.clone(),
        },
        leads,
        calls,
        transcripts,
    }
}

fn fast_options() -> SessionOptions {
    SessionOptions {
        connect_backoff: Duration::from_millis(1),
        reconnect_pause: Duration::from_millis(1),
        ..Default::default()
    }
}

fn media_frame(track: MediaTrack, payload: &str) -> ProviderMessage {
    ProviderMessage::Media {
        stream_sid: Some("MZ1".to_string()),
        media: MediaPayload {
            track,
            chunk: None,
            timestamp: None,
            payload: payload.to_string(),
        },
    }
}

#[tokio::test]
async fn connect_exhaustion_reaches_failed_with_terminator() {
    let h = harness().await;
    let connector = MockConnector::unreachable();

    let (provider_out_tx, mut provider_out_rx) = mpsc::channel(16);
    let (_provider_in_tx, provider_in_rx) = mpsc::channel(16);

    let session = BridgeSession::new("CA1", "MZ1", fast_options(), h.stores.clone(), provider_out_tx);
    let outcome = session.run(connector.clone(), provider_in_rx).await;

    assert!(outcome.failed);
    assert_eq!(outcome.transcripts_written, 0);
    assert_eq!(connector.attempts(), 3);

    // The caller hears a terminator: clear, then a named mark.
    let first = provider_out_rx.recv().await.unwrap();
    assert!(matches!(first, ProviderOutbound::Clear { .. }));
    let second = provider_out_rx.recv().await.unwrap();
    match second {
        ProviderOutbound::Mark { mark, .. } => assert_eq!(mark.name, "bridge-terminated"),
        other => panic!("expected mark, got {other:?}"),
    }

    // No transcripts were written for the failed session.
    assert_eq!(h.transcripts.count_for_call("CA1").await.unwrap(), 0);
}

#[tokio::test]
async fn session_relays_audio_and_persists_transcripts() {
    let h = harness().await;

    // A lead with the dialed number and a prior call event: the first
    // transcript must link them.
    h.leads
        .create(&Lead::new("lead-9").with_phone("+15557654321"))
        .await
        .unwrap();
    h.calls
        .upsert(
            &CallEventUpdate::new("CA999")
                .with_status(CallStatus::InProgress)
                .with_to_number("+15557654321"),
        )
        .await
        .unwrap();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx, ai_rx) = mpsc::channel(64);
    let connector = MockConnector::with_peer(MockPeer {
        incoming: ai_rx,
        sent: sent.clone(),
    });

    let (provider_out_tx, mut provider_out_rx) = mpsc::channel(64);
    let (provider_in_tx, provider_in_rx) = mpsc::channel(64);

    let session = BridgeSession::new("CA999", "MZ1", fast_options(), h.stores.clone(), provider_out_tx);
    let run = tokio::spawn(session.run(connector, provider_in_rx));

    // Caller audio flows in; outbound-track echo frames are dropped.
    provider_in_tx
        .send(media_frame(MediaTrack::Inbound, "AAAA"))
        .await
        .unwrap();
    provider_in_tx
        .send(media_frame(MediaTrack::Outbound, "ECHO"))
        .await
        .unwrap();

    // One full turn from the AI side.
    for event in [
        RealtimeEvent::SessionCreated,
        RealtimeEvent::SpeechStarted,
        RealtimeEvent::SpeechStopped,
        RealtimeEvent::InputBufferCommitted,
        RealtimeEvent::InputTranscriptionCompleted {
            item_id: Some("item_user_1".to_string()),
            transcript: "hello there".to_string(),
        },
        RealtimeEvent::ResponseCreated,
        RealtimeEvent::AudioDelta {
            delta: "BBBB".to_string(),
            item_id: None,
        },
        RealtimeEvent::AudioTranscriptDone {
            transcript: "hi, how can I help?".to_string(),
            item_id: Some("item_asst_1".to_string()),
        },
        RealtimeEvent::ResponseDone,
    ] {
        ai_tx.send(Ok(Some(event))).await.unwrap();
    }

    // Synthesized audio comes back out on the provider leg, in order.
    let out = timeout(Duration::from_secs(2), provider_out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match out {
        ProviderOutbound::Media { stream_sid, media } => {
            assert_eq!(stream_sid, "MZ1");
            assert_eq!(media.payload, "BBBB");
        }
        other => panic!("expected media, got {other:?}"),
    }

    // Provider hangs up; the session winds down cleanly.
    provider_in_tx
        .send(ProviderMessage::Stop {
            stream_sid: Some("MZ1".to_string()),
        })
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.transcripts_written, 2);

    // Caller audio reached the AI input buffer verbatim; the echo did not.
    let sent = sent.lock();
    let appended: Vec<&str> = sent
        .iter()
        .filter_map(|e| match e {
            ClientEvent::InputAudioBufferAppend { audio } => Some(audio.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(appended, ["AAAA"]);

    // The committed buffer triggered a response request.
    assert!(sent
        .iter()
        .any(|e| matches!(e, ClientEvent::ResponseCreate)));
    drop(sent);

    // Both utterances landed, ordered, with the assistant entry carrying
    // latency metrics.
    let entries = h.transcripts.list_for_call("CA999").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, TranscriptRole::User);
    assert_eq!(entries[0].content, "hello there");
    assert_eq!(entries[1].role, TranscriptRole::Assistant);
    assert!(entries[1].latency_metrics.is_some());

    // The first transcript linked the lead to this call exactly once.
    let lead = h.leads.get("lead-9").await.unwrap().unwrap();
    assert_eq!(lead.call_sid.as_deref(), Some("CA999"));
}

#[tokio::test]
async fn speak_first_injects_single_opener() {
    let h = harness().await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx, ai_rx) = mpsc::channel(16);
    let connector = MockConnector::with_peer(MockPeer {
        incoming: ai_rx,
        sent: sent.clone(),
    });

    let (provider_out_tx, _provider_out_rx) = mpsc::channel(16);
    let (provider_in_tx, provider_in_rx) = mpsc::channel(16);

    let mut opts = fast_options();
    opts.speak_first = true;
    opts.initial_message = Some("Hi, this is the assistant calling.".to_string());

    let session = BridgeSession::new("CA2", "MZ2", opts, h.stores.clone(), provider_out_tx);
    let run = tokio::spawn(session.run(connector, provider_in_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let sent = sent.lock();
        // Config first, then the synthetic assistant item, then the
        // response request.
        assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));
        match &sent[1] {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.role, "assistant");
                assert_eq!(item.content[0].text, "Hi, this is the assistant calling.");
            }
            other => panic!("expected item create, got {other:?}"),
        }
        assert!(matches!(sent[2], ClientEvent::ResponseCreate));
    }

    drop(ai_tx);
    provider_in_tx
        .send(ProviderMessage::Stop { stream_sid: None })
        .await
        .ok();
    let outcome = timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    assert!(!outcome.failed);
}

#[tokio::test]
async fn retransmitted_transcript_events_dedupe() {
    let h = harness().await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx, ai_rx) = mpsc::channel(16);
    let connector = MockConnector::with_peer(MockPeer {
        incoming: ai_rx,
        sent,
    });

    let (provider_out_tx, _provider_out_rx) = mpsc::channel(16);
    let (provider_in_tx, provider_in_rx) = mpsc::channel(16);

    let session = BridgeSession::new("CA3", "MZ3", fast_options(), h.stores.clone(), provider_out_tx);
    let run = tokio::spawn(session.run(connector, provider_in_rx));

    let transcript = RealtimeEvent::AudioTranscriptDone {
        transcript: "same utterance".to_string(),
        item_id: Some("item_dup".to_string()),
    };
    ai_tx.send(Ok(Some(transcript.clone()))).await.unwrap();
    ai_tx.send(Ok(Some(transcript))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    provider_in_tx
        .send(ProviderMessage::Stop { stream_sid: None })
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    assert_eq!(outcome.transcripts_written, 1);
    assert_eq!(h.transcripts.count_for_call("CA3").await.unwrap(), 1);
}

#[tokio::test]
async fn error_budget_exhaustion_degrades_session() {
    let h = harness().await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx, ai_rx) = mpsc::channel(16);
    let connector = MockConnector::with_peer(MockPeer {
        incoming: ai_rx,
        sent,
    });

    let (provider_out_tx, mut provider_out_rx) = mpsc::channel(16);
    let (_provider_in_tx, provider_in_rx) = mpsc::channel(16);

    let mut opts = fast_options();
    opts.max_error_events = 3;

    let session = BridgeSession::new("CA4", "MZ4", opts, h.stores.clone(), provider_out_tx);
    let run = tokio::spawn(session.run(connector, provider_in_rx));

    for _ in 0..3 {
        ai_tx
            .send(Ok(Some(RealtimeEvent::ErrorEvent { error: None })))
            .await
            .unwrap();
    }

    let outcome = timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    assert!(outcome.failed);

    let first = provider_out_rx.recv().await.unwrap();
    assert!(matches!(first, ProviderOutbound::Clear { .. }));
}

#[tokio::test]
async fn abnormal_close_reconnects_and_reuses_config() {
    let h = harness().await;

    // First peer dies abnormally after one event; the second carries on.
    let sent_a = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx_a, ai_rx_a) = mpsc::channel(16);
    let sent_b = Arc::new(Mutex::new(Vec::new()));
    let (ai_tx_b, ai_rx_b) = mpsc::channel(16);

    let connector = MockConnector::default();
    connector.peers.lock().push_back(MockPeer {
        incoming: ai_rx_a,
        sent: sent_a,
    });
    connector.peers.lock().push_back(MockPeer {
        incoming: ai_rx_b,
        sent: sent_b.clone(),
    });
    let connector = Arc::new(connector);

    let (provider_out_tx, _provider_out_rx) = mpsc::channel(16);
    let (provider_in_tx, provider_in_rx) = mpsc::channel(16);

    let session = BridgeSession::new("CA5", "MZ5", fast_options(), h.stores.clone(), provider_out_tx);
    let run = tokio::spawn(session.run(connector.clone(), provider_in_rx));

    ai_tx_a
        .send(Err(BridgeError::AbnormalClose { code: 1006 }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The replacement socket was configured with the same session config.
    assert!(matches!(
        sent_b.lock().first(),
        Some(ClientEvent::SessionUpdate { .. })
    ));
    assert_eq!(connector.attempts(), 2);

    drop(ai_tx_b);
    provider_in_tx
        .send(ProviderMessage::Stop { stream_sid: None })
        .await
        .ok();
    let outcome = timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    assert!(!outcome.failed);
}
