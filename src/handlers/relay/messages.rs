//! Relay WebSocket message types
//!
//! JSON messages are tagged by `type`. Audio may also travel as binary
//! frames: `0x01` + PCM16 from the client, `0x02` + PCM16 to the client.

use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::AudioFraming;
use crate::core::session::ClientNotice;
use crate::errors::RelayError;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for one decoded audio payload (1 MiB)
pub const MAX_AUDIO_SIZE: usize = 1024 * 1024;

/// Leading byte of a client audio frame
pub const CLIENT_AUDIO_TAG: u8 = 0x01;

/// Leading byte of a server audio frame
pub const SERVER_AUDIO_TAG: u8 = 0x02;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from client
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RelayIncomingMessage {
    /// Open (or replace) the upstream link
    #[serde(rename = "connect")]
    Connect {
        #[serde(default = "default_true")]
        supports_text_input: bool,
    },

    /// Close the upstream link
    #[serde(rename = "disconnect")]
    Disconnect,

    /// Base64 PCM16 microphone audio
    #[serde(rename = "audio")]
    Audio { audio: String },

    /// Text turn
    #[serde(rename = "text")]
    Text { text: String },

    /// Cancel the response in flight
    #[serde(rename = "interrupt_response", alias = "interrupt")]
    InterruptResponse,

    #[serde(rename = "ping")]
    Ping,
}

fn default_true() -> bool {
    true
}

impl RelayIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), RelayError> {
        match self {
            RelayIncomingMessage::Text { text } if text.len() > MAX_TEXT_SIZE => {
                Err(RelayError::MalformedMessage(format!(
                    "Text too large: {} bytes (max: {MAX_TEXT_SIZE} bytes)",
                    text.len()
                )))
            }
            RelayIncomingMessage::Audio { audio } if audio.len() > max_encoded_audio() => {
                Err(RelayError::MalformedMessage(format!(
                    "Audio too large: {} base64 bytes (max: {MAX_AUDIO_SIZE} decoded bytes)",
                    audio.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

fn max_encoded_audio() -> usize {
    MAX_AUDIO_SIZE.div_ceil(3) * 4
}

/// Decode the base64 payload of an `audio` message.
pub fn decode_audio(audio: &str) -> Result<Bytes, RelayError> {
    BASE64_STANDARD
        .decode(audio.trim())
        .map(Bytes::from)
        .map_err(|e| RelayError::MalformedMessage(format!("Invalid base64 audio: {e}")))
}

/// Split a binary client frame into its PCM payload.
pub fn parse_binary_frame(data: &Bytes) -> Result<Bytes, RelayError> {
    match data.first() {
        Some(&CLIENT_AUDIO_TAG) if data.len() - 1 <= MAX_AUDIO_SIZE => Ok(data.slice(1..)),
        Some(&CLIENT_AUDIO_TAG) => Err(RelayError::MalformedMessage(format!(
            "Audio too large: {} bytes (max: {MAX_AUDIO_SIZE} bytes)",
            data.len() - 1
        ))),
        Some(tag) => Err(RelayError::MalformedMessage(format!(
            "Unknown binary frame type 0x{tag:02x}"
        ))),
        None => Err(RelayError::MalformedMessage("Empty binary frame".to_string())),
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RelayOutgoingMessage {
    #[serde(rename = "connected")]
    Connected { session_id: String },

    #[serde(rename = "disconnected")]
    Disconnected,

    #[serde(rename = "response.text.delta")]
    TextDelta {
        response_id: String,
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        response_id: String,
        item_id: String,
        text: String,
    },

    /// Base64 PCM16, used when audio framing is JSON
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        response_id: String,
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone { response_id: String, item_id: String },

    #[serde(rename = "response.done")]
    ResponseDone { response_id: String, status: String },

    #[serde(rename = "response_interrupted")]
    ResponseInterrupted,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { item_id: String, transcript: String },

    #[serde(rename = "error")]
    Error { error: ErrorBody },

    #[serde(rename = "pong")]
    Pong,
}

/// Payload of an `error` message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&RelayError> for RelayOutgoingMessage {
    fn from(error: &RelayError) -> Self {
        RelayOutgoingMessage::Error {
            error: ErrorBody {
                code: error.code().to_string(),
                message: error.detail().to_string(),
            },
        }
    }
}

/// Message routing for the sender task
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessageRoute {
    /// JSON text message
    Outgoing(RelayOutgoingMessage),
    /// Binary frame, already tagged
    Binary(Bytes),
    /// Close connection
    Close,
}

impl RelayMessageRoute {
    /// Audio deltas may be evicted under backpressure, nothing else may.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            RelayMessageRoute::Binary(_)
                | RelayMessageRoute::Outgoing(RelayOutgoingMessage::AudioDelta { .. })
        )
    }

    pub fn error(error: &RelayError) -> Self {
        RelayMessageRoute::Outgoing(error.into())
    }

    /// Render a session notice for the wire.
    pub fn from_notice(notice: ClientNotice, session_id: &str, framing: AudioFraming) -> Self {
        let message = match notice {
            ClientNotice::Connected => RelayOutgoingMessage::Connected {
                session_id: session_id.to_string(),
            },
            ClientNotice::Disconnected => RelayOutgoingMessage::Disconnected,
            ClientNotice::Interrupted => RelayOutgoingMessage::ResponseInterrupted,
            ClientNotice::TextDelta {
                response_id,
                item_id,
                delta,
            } => RelayOutgoingMessage::TextDelta {
                response_id,
                item_id,
                delta,
            },
            ClientNotice::TextDone {
                response_id,
                item_id,
                text,
            } => RelayOutgoingMessage::TextDone {
                response_id,
                item_id,
                text,
            },
            ClientNotice::AudioDelta {
                response_id,
                item_id,
                pcm,
            } => match framing {
                AudioFraming::Binary => return RelayMessageRoute::Binary(server_audio_frame(&pcm)),
                AudioFraming::Json => RelayOutgoingMessage::AudioDelta {
                    response_id,
                    item_id,
                    delta: BASE64_STANDARD.encode(&pcm),
                },
            },
            ClientNotice::AudioDone {
                response_id,
                item_id,
            } => RelayOutgoingMessage::AudioDone {
                response_id,
                item_id,
            },
            ClientNotice::ResponseDone {
                response_id,
                status,
            } => RelayOutgoingMessage::ResponseDone {
                response_id,
                status,
            },
            ClientNotice::Transcript {
                item_id,
                transcript,
            } => RelayOutgoingMessage::TranscriptionCompleted {
                item_id,
                transcript,
            },
            ClientNotice::Error(error) => (&error).into(),
        };
        RelayMessageRoute::Outgoing(message)
    }
}

/// `0x02` followed by the PCM bytes.
pub fn server_audio_frame(pcm: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(pcm.len() + 1);
    frame.put_u8(SERVER_AUDIO_TAG);
    frame.put_slice(pcm);
    frame.freeze()
}
