use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional. Values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3000
///   cors_allowed_origins: "https://app.example.com"
///
/// openai:
///   api_key: "sk-..."
///   realtime_url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///   instructions: "You are a friendly voice assistant."
///   voice: "alloy"
///   language: "en"
///   transcription_model: "whisper-1"
///   connect_timeout_ms: 10000
///
/// turn_detection:
///   type: "server_vad"
///   threshold: 0.6
///   prefix_padding_ms: 300
///   silence_duration_ms: 800
///
/// relay:
///   commit_policy: "debounced"
///   commit_quiet_period_ms: 2000
///   commit_max_buffered_ms: 5000
///   commit_min_buffered_ms: 500
///   silence_threshold: 0.001
///   audio_framing: "binary"
///
/// interruption:
///   threshold: 60
///   confirm_ms: 300
///   cooldown_ms: 1000
///   recovery_ms: 500
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub relay: Option<RelayYaml>,
    pub interruption: Option<InterruptionYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allowed_origins: Option<String>,
}

/// Upstream engine settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    /// ISO-639-1 transcription language
    pub language: Option<String>,
    pub transcription_model: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

/// Server-side turn detection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    /// server_vad, semantic_vad or none
    #[serde(rename = "type")]
    pub detection_type: Option<String>,
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    /// semantic_vad only
    pub eagerness: Option<String>,
}

/// Relay behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    /// immediate or debounced
    pub commit_policy: Option<String>,
    pub commit_quiet_period_ms: Option<u64>,
    pub commit_max_buffered_ms: Option<u64>,
    pub commit_min_buffered_ms: Option<u64>,
    pub silence_threshold: Option<f32>,
    /// binary or json
    pub audio_framing: Option<String>,
}

/// Interruption detector tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InterruptionYaml {
    pub threshold: Option<f32>,
    pub confirm_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub recovery_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
