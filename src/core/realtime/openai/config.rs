//! OpenAI Realtime API configuration helpers.
//!
//! - Endpoint URL construction
//! - Voice names
//! - Output modalities

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Default OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Audio sample rate of the `pcm16` format.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// The only audio format the relay negotiates.
pub const PCM16_FORMAT: &str = "pcm16";

/// Default input transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Build the connection URL, adding `model=<model>` unless the URL already names one.
pub fn build_realtime_url(endpoint: &str, model: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        RealtimeError::InvalidConfiguration(format!("Invalid realtime URL '{endpoint}': {e}"))
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "Realtime URL must use ws:// or wss://, got {other}://"
            )));
        }
    }

    let has_model = url.query_pairs().any(|(key, _)| key == "model");
    if !has_model && !model.is_empty() {
        url.query_pairs_mut().append_pair("model", model);
    }
    Ok(url)
}

// =============================================================================
// Voices
// =============================================================================

/// Voices known to the Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "alloy" => Some(Self::Alloy),
            "ash" => Some(Self::Ash),
            "ballad" => Some(Self::Ballad),
            "coral" => Some(Self::Coral),
            "echo" => Some(Self::Echo),
            "sage" => Some(Self::Sage),
            "shimmer" => Some(Self::Shimmer),
            "verse" => Some(Self::Verse),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Output modalities for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }

    /// Text plus audio, the pair every relay turn requests.
    pub fn text_and_audio() -> Vec<String> {
        vec![Self::Text.as_str().to_string(), Self::Audio.as_str().to_string()]
    }
}

// =============================================================================
// Tests
// =============================================================================
