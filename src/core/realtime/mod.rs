//! Upstream realtime link.
//!
//! Each relay session owns one link to the generation engine. The
//! [`BaseRealtime`] trait is the seam between the session bridge and the
//! provider; the bridge only ever sees [`UpstreamEvent`]s.
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime API** - full duplex audio with GPT-4o

mod base;
pub mod openai;

pub use base::{
    BaseRealtime, BoxedRealtime, ConnectionState, InputTranscriptionConfig, RealtimeAudioData,
    RealtimeConfig, RealtimeError, RealtimeResult, ResponseRequest, TurnDetectionConfig,
    UpstreamEvent, UpstreamEventCallback,
};
pub use openai::{
    Modality, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime,
    OpenAIRealtimeVoice,
};

/// Supported realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(RealtimeProvider::OpenAI),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Create an upstream link for the named provider.
pub fn create_realtime_provider(
    provider_type: &str,
    config: RealtimeConfig,
) -> RealtimeResult<BoxedRealtime> {
    match RealtimeProvider::parse(provider_type) {
        Some(RealtimeProvider::OpenAI) => Ok(Box::new(OpenAIRealtime::new(config)?)),
        None => Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported realtime provider: {provider_type}. Supported providers: {}",
            get_supported_realtime_providers().join(", ")
        ))),
    }
}

/// Get list of supported realtime providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai"]
}
