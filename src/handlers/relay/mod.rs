//! Voice relay WebSocket handlers
//!
//! Bridges one browser client to one upstream realtime link.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **connect**: Open the upstream link (`supports_text_input` defaults to true)
//! - **disconnect**: Close the upstream link
//! - **audio**: Base64 PCM16 microphone audio, or a binary frame `0x01` + PCM16
//! - **text**: Text turn
//! - **interrupt_response**: Cancel the response in flight
//! - **ping**: Keepalive, answered with `pong`
//!
//! ## Server → Client
//!
//! - **connected** / **disconnected**
//! - **response.text.delta** / **response.text.done**
//! - **response.audio.delta**: binary `0x02` + PCM16, or base64 JSON
//! - **response.audio.done** / **response.done**
//! - **response_interrupted**
//! - **conversation.item.input_audio_transcription.completed**
//! - **error**: `{"error": {"code", "message"}}`

mod handler;
pub mod messages;
pub mod outbox;

pub use handler::relay_handler;
pub use messages::{RelayIncomingMessage, RelayMessageRoute, RelayOutgoingMessage};
pub use outbox::Outbox;
