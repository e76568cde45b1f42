//! OpenAI Realtime API client implementation.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>` (configurable)
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! `connect` performs the handshake and writes `session.update` directly on
//! the socket before spawning the I/O task, so a successful return means the
//! session configuration is already on the wire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::config::{
    DEFAULT_TRANSCRIPTION_MODEL, Modality, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeVoice, PCM16_FORMAT, build_realtime_url,
};
use super::messages::{
    ClientEvent, InputAudioTranscription, ResponseConfig, ServerEvent, SessionConfig,
    TurnDetection,
};
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError,
    RealtimeResult, ResponseRequest, TurnDetectionConfig, UpstreamEvent, UpstreamEventCallback,
};

/// Channel capacity for outgoing client events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the I/O task to send its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why the socket writer stopped.
enum WriterExit {
    /// The client dropped its command sender.
    Local,
    Failed(String),
}

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// Upstream link to the OpenAI Realtime API.
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    url: Url,
    state: Arc<Mutex<ConnectionState>>,
    /// Shared with the I/O task
    connected: Arc<AtomicBool>,
    ws_sender: Option<mpsc::Sender<ClientEvent>>,
    event_callback: Option<UpstreamEventCallback>,
    connection_handle: Option<JoinHandle<()>>,
}

impl OpenAIRealtime {
    /// Full connection URL including the model parameter.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the `session.update` payload.
    pub fn build_session_config(&self) -> SessionConfig {
        let voice = self
            .config
            .voice
            .clone()
            .unwrap_or_else(|| OpenAIRealtimeVoice::default().to_string());

        SessionConfig {
            modalities: Some(
                self.config
                    .modalities
                    .clone()
                    .unwrap_or_else(Modality::text_and_audio),
            ),
            instructions: self.config.instructions.clone(),
            voice: Some(voice),
            input_audio_format: Some(PCM16_FORMAT.to_string()),
            output_audio_format: Some(PCM16_FORMAT.to_string()),
            input_audio_transcription: self.config.input_audio_transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: if t.model.is_empty() {
                        DEFAULT_TRANSCRIPTION_MODEL.to_string()
                    } else {
                        t.model.clone()
                    },
                    language: t.language.clone(),
                }
            }),
            turn_detection: match self.config.turn_detection.as_ref() {
                Some(TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                    create_response,
                    interrupt_response,
                }) => Some(TurnDetection::ServerVad {
                    threshold: *threshold,
                    prefix_padding_ms: *prefix_padding_ms,
                    silence_duration_ms: *silence_duration_ms,
                    create_response: *create_response,
                    interrupt_response: *interrupt_response,
                }),
                Some(TurnDetectionConfig::SemanticVad {
                    eagerness,
                    create_response,
                    interrupt_response,
                }) => Some(TurnDetection::SemanticVad {
                    eagerness: eagerness.clone(),
                    create_response: *create_response,
                    interrupt_response: *interrupt_response,
                }),
                Some(TurnDetectionConfig::None) | None => None,
            },
        }
    }

    fn build_request(&self) -> RealtimeResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|_| {
                RealtimeError::InvalidConfiguration(
                    "API key contains characters not allowed in a header".to_string(),
                )
            })?;
        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
        Ok(request)
    }

    async fn send_event(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        let Some(sender) = self.ws_sender.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        trace!(event = event.event_type(), "Queueing upstream event");
        sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Map a wire event onto the provider-neutral event set.
    ///
    /// Returns `None` for events the relay has no use for.
    pub fn translate_server_event(event: ServerEvent) -> Option<UpstreamEvent> {
        match event {
            ServerEvent::Error { error } => {
                error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type, error.message
                );
                Some(UpstreamEvent::Error {
                    message: error.message,
                    code: error.code,
                })
            }

            ServerEvent::SessionCreated { .. } => {
                debug!("OpenAI Realtime session created");
                None
            }

            ServerEvent::SessionUpdated { .. } => {
                debug!("OpenAI Realtime session updated");
                None
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                Some(UpstreamEvent::SpeechStarted { audio_start_ms })
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                Some(UpstreamEvent::SpeechStopped { audio_end_ms })
            }

            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => Some(UpstreamEvent::TranscriptionCompleted {
                item_id,
                transcript,
            }),

            ServerEvent::TranscriptionFailed { item_id, error } => {
                warn!(item_id = %item_id, "Input transcription failed: {}", error.message);
                None
            }

            ServerEvent::ResponseCreated { response } => Some(UpstreamEvent::ResponseCreated {
                response_id: response.id,
            }),

            ServerEvent::ResponseDone { response } => Some(UpstreamEvent::ResponseDone {
                response_id: response.id,
                status: response.status,
            }),

            ServerEvent::TextDelta {
                response_id,
                item_id,
                delta,
            } => Some(UpstreamEvent::TextDelta {
                response_id,
                item_id,
                delta,
            }),

            ServerEvent::TextDone {
                response_id,
                item_id,
                text,
            } => Some(UpstreamEvent::TextDone {
                response_id,
                item_id,
                text,
            }),

            ServerEvent::AudioDelta {
                response_id,
                item_id,
                delta,
            } => match ServerEvent::decode_audio_delta(&delta) {
                Ok(audio) => Some(UpstreamEvent::AudioDelta(RealtimeAudioData {
                    data: Bytes::from(audio),
                    sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
                    item_id: Some(item_id),
                    response_id: Some(response_id),
                })),
                Err(e) => {
                    warn!("Failed to decode audio delta: {}", e);
                    None
                }
            },

            ServerEvent::AudioDone {
                response_id,
                item_id,
            } => Some(UpstreamEvent::AudioDone {
                response_id,
                item_id,
            }),

            _ => {
                trace!("Unhandled server event");
                None
            }
        }
    }
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        if config.model.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "Model is required".to_string(),
            ));
        }

        let endpoint = if config.url.is_empty() {
            OPENAI_REALTIME_URL
        } else {
            config.url.as_str()
        };
        let url = build_realtime_url(endpoint, &config.model)?;

        if let Some(voice) = config.voice.as_deref()
            && OpenAIRealtimeVoice::parse(voice).is_none()
        {
            warn!(voice, "Unknown voice, passing through to the API");
        }

        Ok(Self {
            config,
            url,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            ws_sender: None,
            event_callback: None,
            connection_handle: None,
        })
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        *self.state.lock() = ConnectionState::Connecting;
        let request = self.build_request()?;

        let handshake = tokio_tungstenite::connect_async(request);
        let result = if self.config.connect_timeout_ms > 0 {
            match tokio::time::timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                handshake,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    *self.state.lock() = ConnectionState::Failed;
                    return Err(RealtimeError::Timeout(
                        "Realtime API handshake".to_string(),
                    ));
                }
            }
        } else {
            handshake.await
        };

        let (ws_stream, _response) = match result {
            Ok(ok) => ok,
            Err(tungstenite::Error::Http(response))
                if response.status() == http::StatusCode::UNAUTHORIZED
                    || response.status() == http::StatusCode::FORBIDDEN =>
            {
                *self.state.lock() = ConnectionState::Failed;
                return Err(RealtimeError::AuthenticationFailed(format!(
                    "Realtime API rejected credentials ({})",
                    response.status()
                )));
            }
            Err(e) => {
                *self.state.lock() = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        info!(url = %self.url, "Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Configuration goes out before anything else can be queued.
        let session_update = ClientEvent::SessionUpdate {
            session: self.build_session_config(),
        };
        let json = serde_json::to_string(&session_update)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
            *self.state.lock() = ConnectionState::Failed;
            return Err(RealtimeError::WebSocketError(format!(
                "Failed to send session configuration: {e}"
            )));
        }
        debug!("Session configuration sent");

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        self.ws_sender = Some(tx);

        let callback = self.event_callback.clone();
        let connected = self.connected.clone();
        let state = self.state.clone();

        self.connected.store(true, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Connected;

        // Writes run on their own task so a slow event consumer never stops
        // queued commands from reaching the socket.
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<Bytes>();
        let mut writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            // Every sender dropped: local disconnect.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return WriterExit::Local;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            return WriterExit::Failed(e.to_string());
                        }
                    }
                    Some(data) = pong_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                }
            }
        });

        let handle = tokio::spawn(async move {
            let mut close_reason: Option<String> = None;
            let mut intentional = false;
            let mut writer_done = false;

            loop {
                tokio::select! {
                    exit = &mut writer => {
                        writer_done = true;
                        match exit {
                            Ok(WriterExit::Local) => intentional = true,
                            Ok(WriterExit::Failed(reason)) => close_reason = Some(reason),
                            Err(e) => close_reason = Some(e.to_string()),
                        }
                        break;
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if let Some(event) = Self::translate_server_event(event)
                                            && let Some(cb) = callback.as_ref()
                                        {
                                            cb(event).await;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse server event: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = pong_tx.send(data);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Realtime WebSocket closed by server");
                                close_reason = frame.map(|f| f.reason.to_string());
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Realtime WebSocket error: {}", e);
                                close_reason = Some(e.to_string());
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            if !writer_done {
                writer.abort();
            }

            connected.store(false, Ordering::SeqCst);
            *state.lock() = ConnectionState::Disconnected;

            if !intentional && let Some(cb) = callback.as_ref() {
                cb(UpstreamEvent::Closed {
                    reason: close_reason,
                })
                .await;
            }
            debug!("OpenAI Realtime connection task ended");
        });

        self.connection_handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        // Dropping the sender lets the task send a close frame and exit quietly.
        self.ws_sender = None;

        if let Some(mut handle) = self.connection_handle.take()
            && tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err()
        {
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Disconnected;
        info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn send_audio(&mut self, audio_data: Bytes) -> RealtimeResult<()> {
        self.send_event(ClientEvent::audio_append(&audio_data)).await
    }

    async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        self.send_event(ClientEvent::user_text(text)).await
    }

    async fn commit_audio_buffer(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferCommit).await
    }

    async fn clear_audio_buffer(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferClear).await
    }

    async fn create_response(&mut self, request: Option<ResponseRequest>) -> RealtimeResult<()> {
        let response = request.map(|r| ResponseConfig {
            modalities: r.modalities,
            instructions: r.instructions,
        });
        self.send_event(ClientEvent::ResponseCreate { response })
            .await
    }

    async fn cancel_response(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCancel).await
    }

    fn on_event(&mut self, callback: UpstreamEventCallback) -> RealtimeResult<()> {
        self.event_callback = Some(callback);
        Ok(())
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
