//! Configuration module for the relay server
//!
//! Settings come from YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable access
//! - `merge`: Layering YAML over environment over defaults
//! - `validation`: Range checks and problem collection
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(Path::new("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::InterruptionConfig;
use crate::core::realtime::openai::Modality;
use crate::core::realtime::{InputTranscriptionConfig, RealtimeConfig, TurnDetectionConfig};
use crate::core::session::{CommitPolicy, DEFAULT_PREROLL_MS, SessionPolicy};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {}", join_errors(.0))]
    Multiple(Vec<ConfigError>),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How audio deltas are delivered to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFraming {
    /// Binary frame: `0x02` followed by raw PCM16
    #[default]
    Binary,
    /// `response.audio.delta` JSON with base64 audio
    Json,
}

impl AudioFraming {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "binary" => Some(Self::Binary),
            "json" | "base64" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for AudioFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma separated origins; `*` or `None` allows any
    pub cors_allowed_origins: Option<String>,

    // Upstream engine
    pub openai_api_key: String,
    pub realtime_url: String,
    pub model: String,
    pub instructions: String,
    pub voice: String,
    pub language: Option<String>,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    /// Upstream handshake timeout in milliseconds (0 disables)
    pub connect_timeout_ms: u64,

    // Relay behaviour
    pub commit_policy: CommitPolicy,
    pub silence_threshold: f32,
    pub interruption: InterruptionConfig,
    pub interrupt_recovery_ms: u64,
    pub audio_framing: AudioFraming,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("openai_api_key", &"<redacted>")
            .field("realtime_url", &self.realtime_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("language", &self.language)
            .field("transcription_model", &self.transcription_model)
            .field("turn_detection", &self.turn_detection)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("commit_policy", &self.commit_policy)
            .field("silence_threshold", &self.silence_threshold)
            .field("interruption", &self.interruption)
            .field("interrupt_recovery_ms", &self.interrupt_recovery_ms)
            .field("audio_framing", &self.audio_framing)
            .finish()
    }
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.openai_api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` is loaded by `main` before this is called.
    ///
    /// # Errors
    /// Returns a single error naming every missing or invalid variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env::process_env)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed, or
    /// the merged configuration fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        merge::merge_config(&env::EnvReader::new(env::process_env), Some(yaml_config))
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        merge::merge_config(&env::EnvReader::new(lookup), None)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for one upstream link.
    pub fn to_realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone(),
            url: self.realtime_url.clone(),
            model: self.model.clone(),
            voice: Some(self.voice.clone()),
            instructions: Some(self.instructions.clone()),
            modalities: Some(Modality::text_and_audio()),
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: self.transcription_model.clone(),
                language: self.language.clone(),
            }),
            turn_detection: Some(self.turn_detection.clone()),
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }

    /// Tuning applied to every session.
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            commit_policy: self.commit_policy,
            silence_threshold: self.silence_threshold,
            interruption: self.interruption,
            recovery_ms: self.interrupt_recovery_ms,
            preroll_ms: DEFAULT_PREROLL_MS,
            instructions: Some(self.instructions.clone()),
        }
    }
}
