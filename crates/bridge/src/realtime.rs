//! AI realtime peer protocol and client
//!
//! The peer speaks an opaque JSON event stream over a WebSocket with
//! bearer credentials. Both audio legs use the provider codec (g711 μ-law)
//! so frames pass through without transcoding.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::BridgeError;

/// Session configuration pushed on READY (and again after a reconnect)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSessionConfig {
    pub modalities: Vec<String>,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetectionConfig,
    pub max_response_output_tokens: u32,
}

impl RealtimeSessionConfig {
    /// Bridge defaults: both legs μ-law, server-side voice-activity turn
    /// detection, input transcription on.
    pub fn for_bridge(voice: impl Into<String>, max_response_tokens: u32) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            voice: voice.into(),
            input_audio_format: "g711_ulaw".to_string(),
            output_audio_format: "g711_ulaw".to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: "whisper-1".to_string(),
            },
            turn_detection: TurnDetectionConfig {
                kind: "server_vad".to_string(),
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
            },
            max_response_output_tokens: max_response_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// A conversation item injected by the bridge (speak-first opener)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ItemContent>,
}

impl ConversationItem {
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "assistant".to_string(),
            content: vec![ItemContent {
                kind: "text".to_string(),
                text: text.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Events the bridge produces
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: RealtimeSessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Events the bridge consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "input_audio_buffer.committed")]
    InputBufferCommitted,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        transcript: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    ErrorEvent {
        #[serde(default)]
        error: Option<RealtimeErrorDetail>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// One open realtime socket
#[async_trait]
pub trait RealtimePeer: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<(), BridgeError>;
    /// `Ok(None)` is a normal closure (code 1000); transport failures and
    /// abnormal closes surface as errors so the session can reconnect.
    async fn recv(&mut self) -> Result<Option<RealtimeEvent>, BridgeError>;
    async fn close(&mut self) -> Result<(), BridgeError>;
}

/// Dials realtime sockets; sessions reconnect through the same connector
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimePeer>, BridgeError>;
}

/// WebSocket connector against the configured realtime endpoint
pub struct TungsteniteConnector {
    url: String,
    api_key: String,
    connect_deadline: Duration,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, connect_deadline: Duration) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            connect_deadline,
        }
    }
}

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimePeer>, BridgeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| BridgeError::Connect(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connect = tokio_tungstenite::connect_async(request);
        let (ws, _response) = tokio::time::timeout(self.connect_deadline, connect)
            .await
            .map_err(|_| BridgeError::ConnectTimeout(self.connect_deadline))?
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        tracing::debug!(url = %self.url, "Realtime socket connected");
        Ok(Box::new(TungstenitePeer { ws }))
    }
}

struct TungstenitePeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimePeer for TungstenitePeer {
    async fn send(&mut self, event: ClientEvent) -> Result<(), BridgeError> {
        let text = serde_json::to_string(&event)?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<RealtimeEvent>, BridgeError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<RealtimeEvent>(&text) {
                        Ok(event) => return Ok(Some(event)),
                        Err(e) => {
                            tracing::trace!(error = %e, "Unparseable realtime event skipped");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    if code == u16::from(CloseCode::Normal) {
                        return Ok(None);
                    }
                    return Err(BridgeError::AbnormalClose { code });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BridgeError::Transport(e.to_string())),
                None => return Err(BridgeError::AbnormalClose { code: 1006 }),
            }
        }
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}
