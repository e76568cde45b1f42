//! OpenAI Realtime API link.
//!
//! Bidirectional audio streaming with a GPT-4o realtime model.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, Modality, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeVoice, PCM16_FORMAT, build_realtime_url,
};
pub use messages::{
    ApiError, ClientEvent, ConversationItem, ResponseConfig, ResponseInfo, ServerEvent,
    SessionConfig, TurnDetection,
};
