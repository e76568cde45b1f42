//! Base traits and types for the upstream realtime link.
//!
//! A relay session owns at most one [`BaseRealtime`] link. The link is a
//! full-duplex WebSocket to the generation engine: commands go out through
//! the async methods, and everything the engine emits comes back through a
//! single ordered [`UpstreamEventCallback`].
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, 24kHz, mono, in both directions.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the upstream link.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for one upstream link.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint
    #[serde(default)]
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Response modalities (text, audio, or both)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,

    /// Enable input audio transcription
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration; `None` disables server-side turn detection
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Handshake timeout in milliseconds (0 = no timeout)
    #[serde(default)]
    pub connect_timeout_ms: u64,
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &"<redacted>")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("modalities", &self.modalities)
            .field("input_audio_transcription", &self.input_audio_transcription)
            .field("turn_detection", &self.turn_detection)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
    /// Language hint (ISO-639-1)
    #[serde(default)]
    pub language: Option<String>,
}

/// Configuration for server-side turn detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Energy-based server VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Audio kept before detected speech (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence that ends a turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        #[serde(default)]
        create_response: Option<bool>,
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// Semantic turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// low, medium, high, auto
        #[serde(default)]
        eagerness: Option<String>,
        #[serde(default)]
        create_response: Option<bool>,
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.6),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(800),
            create_response: None,
            interrupt_response: None,
        }
    }
}

/// Per-request options for `response.create`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseRequest {
    pub modalities: Option<Vec<String>>,
    pub instructions: Option<String>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Handshake or session configuration failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Upstream Events
// =============================================================================

/// Decoded audio chunk from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeAudioData {
    /// Raw audio bytes (PCM 16-bit, 24kHz, mono, little-endian)
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Item ID from the provider
    pub item_id: Option<String>,
    /// Response ID from the provider
    pub response_id: Option<String>,
}

/// Provider-neutral events delivered by the upstream link, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A response started generating.
    ResponseCreated { response_id: String },
    /// Audio delta, already decoded from its transport encoding.
    AudioDelta(RealtimeAudioData),
    AudioDone {
        response_id: String,
        item_id: String,
    },
    TextDelta {
        response_id: String,
        item_id: String,
        delta: String,
    },
    TextDone {
        response_id: String,
        item_id: String,
        text: String,
    },
    /// Transcript of the user's committed input audio.
    TranscriptionCompleted { item_id: String, transcript: String },
    /// A response finished, was cancelled, or failed.
    ResponseDone { response_id: String, status: String },
    /// Server VAD heard the user start speaking.
    SpeechStarted { audio_start_ms: u64 },
    /// Server VAD heard the user stop speaking.
    SpeechStopped { audio_end_ms: u64 },
    /// The engine reported an error.
    Error {
        message: String,
        code: Option<String>,
    },
    /// The link closed. Always the last event of a link.
    Closed { reason: Option<String> },
}

impl UpstreamEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamEvent::ResponseCreated { .. } => "response.created",
            UpstreamEvent::AudioDelta(_) => "response.audio.delta",
            UpstreamEvent::AudioDone { .. } => "response.audio.done",
            UpstreamEvent::TextDelta { .. } => "response.text.delta",
            UpstreamEvent::TextDone { .. } => "response.text.done",
            UpstreamEvent::TranscriptionCompleted { .. } => "transcription.completed",
            UpstreamEvent::ResponseDone { .. } => "response.done",
            UpstreamEvent::SpeechStarted { .. } => "speech_started",
            UpstreamEvent::SpeechStopped { .. } => "speech_stopped",
            UpstreamEvent::Error { .. } => "error",
            UpstreamEvent::Closed { .. } => "closed",
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback receiving every upstream event.
pub type UpstreamEventCallback =
    Arc<dyn Fn(UpstreamEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for upstream realtime links.
///
/// `connect` must not return `Ok` until the session configuration has been
/// written to the socket; callers rely on that ordering before telling their
/// own client the link is ready. Links never reconnect on their own.
///
/// # Example
///
/// ```rust,ignore
/// use voice_relay::core::realtime::{BaseRealtime, OpenAIRealtime, RealtimeConfig};
/// use std::sync::Arc;
///
/// let mut link = OpenAIRealtime::new(RealtimeConfig {
///     api_key: "sk-...".to_string(),
///     url: "wss://api.openai.com/v1/realtime".to_string(),
///     model: "gpt-4o-realtime-preview".to_string(),
///     ..Default::default()
/// })?;
/// link.on_event(Arc::new(|event| Box::pin(async move {
///     tracing::debug!(kind = event.kind(), "upstream event");
/// })))?;
/// link.connect().await?;
/// link.send_audio(pcm).await?;
/// ```
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Create a new link. No I/O happens until `connect`.
    fn new(config: RealtimeConfig) -> RealtimeResult<Self>
    where
        Self: Sized;

    /// Open the link and send the session configuration.
    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Close the link. Idempotent.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    /// Check if the link is connected and ready.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------

    /// Append PCM16 audio to the engine's input buffer.
    async fn send_audio(&mut self, audio_data: Bytes) -> RealtimeResult<()>;

    /// Add a user text message to the conversation.
    async fn send_text(&mut self, text: &str) -> RealtimeResult<()>;

    /// Commit the input audio buffer as a user turn.
    async fn commit_audio_buffer(&mut self) -> RealtimeResult<()>;

    /// Discard the input audio buffer.
    async fn clear_audio_buffer(&mut self) -> RealtimeResult<()>;

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    /// Ask the engine to generate a response.
    async fn create_response(&mut self, request: Option<ResponseRequest>) -> RealtimeResult<()>;

    /// Cancel the in-progress response.
    async fn cancel_response(&mut self) -> RealtimeResult<()>;

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Register the event callback. Must be called before `connect`.
    fn on_event(&mut self, callback: UpstreamEventCallback) -> RealtimeResult<()>;
}

/// Boxed trait object for upstream links.
pub type BoxedRealtime = Box<dyn BaseRealtime>;
