//! Layering of YAML over environment over defaults.

use super::env::EnvReader;
use super::validation::{Problems, validate_level, validate_realtime_url, validate_unit_interval};
use super::yaml::{InterruptionYaml, OpenAIYaml, RelayYaml, ServerYaml, TurnDetectionYaml, YamlConfig};
use super::{AudioFraming, ConfigError, ServerConfig};
use crate::core::audio::{DEFAULT_SILENCE_THRESHOLD, InterruptionConfig};
use crate::core::realtime::TurnDetectionConfig;
use crate::core::realtime::openai::{DEFAULT_TRANSCRIPTION_MODEL, OpenAIRealtimeVoice};
use crate::core::session::{CommitPolicy, DEFAULT_RECOVERY_MS};

pub(crate) const DEFAULT_HOST: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 3000;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

const EAGERNESS_VALUES: [&str; 4] = ["low", "medium", "high", "auto"];

/// Build a validated [`ServerConfig`]. YAML values win over environment values.
pub(crate) fn merge_config<F>(
    env: &EnvReader<F>,
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let openai = yaml.openai.unwrap_or_default();
    let turn = yaml.turn_detection.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let interruption = yaml.interruption.unwrap_or_default();

    let mut problems = Problems::default();

    let (host, port, cors_allowed_origins) = merge_server(env, server, &mut problems);

    let OpenAIYaml {
        api_key,
        realtime_url,
        model,
        instructions,
        voice,
        language,
        transcription_model,
        connect_timeout_ms,
    } = openai;

    let openai_api_key = required(api_key, env, "OPENAI_API_KEY", &mut problems);
    let realtime_url = required(realtime_url, env, "REALTIME_URL", &mut problems);
    let model = required(model, env, "OPENAI_MODEL", &mut problems);
    let instructions = required(instructions, env, "REALTIME_INSTRUCTIONS", &mut problems);

    if !realtime_url.is_empty()
        && let Err(reason) = validate_realtime_url(&realtime_url, &model)
    {
        problems.invalid("REALTIME_URL", &realtime_url, reason);
    }

    let voice = voice
        .or_else(|| env.string("OPENAI_VOICE"))
        .unwrap_or_else(|| OpenAIRealtimeVoice::default().to_string());
    if OpenAIRealtimeVoice::parse(&voice).is_none() {
        problems.invalid("OPENAI_VOICE", &voice, "unknown voice");
    }

    let language = language.or_else(|| env.string("OPENAI_LANGUAGE"));
    let transcription_model = transcription_model
        .or_else(|| env.string("TRANSCRIPTION_MODEL"))
        .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());
    let connect_timeout_ms = connect_timeout_ms
        .or_else(|| env.parsed("UPSTREAM_CONNECT_TIMEOUT_MS", &mut problems))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

    let turn_detection = merge_turn_detection(env, turn, &mut problems);
    let (commit_policy, silence_threshold, audio_framing) =
        merge_relay(env, relay, &mut problems);
    let (interruption, interrupt_recovery_ms) =
        merge_interruption(env, interruption, &mut problems);

    problems.into_result()?;

    Ok(ServerConfig {
        host,
        port,
        cors_allowed_origins,
        openai_api_key,
        realtime_url,
        model,
        instructions,
        voice,
        language,
        transcription_model,
        turn_detection,
        commit_policy,
        silence_threshold,
        interruption,
        interrupt_recovery_ms,
        audio_framing,
        connect_timeout_ms,
    })
}

fn required<F>(
    yaml: Option<String>,
    env: &EnvReader<F>,
    name: &str,
    problems: &mut Problems,
) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match yaml
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| env.string(name))
    {
        Some(value) => value,
        None => {
            problems.missing(name);
            String::new()
        }
    }
}

fn merge_server<F>(
    env: &EnvReader<F>,
    server: ServerYaml,
    problems: &mut Problems,
) -> (String, u16, Option<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let host = server
        .host
        .or_else(|| env.string("SERVER_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server
        .port
        .or_else(|| env.parsed("SERVER_PORT", problems))
        .unwrap_or(DEFAULT_PORT);
    let cors = server
        .cors_allowed_origins
        .or_else(|| env.string("CORS_ALLOWED_ORIGINS"));
    (host, port, cors)
}

fn merge_turn_detection<F>(
    env: &EnvReader<F>,
    turn: TurnDetectionYaml,
    problems: &mut Problems,
) -> TurnDetectionConfig
where
    F: Fn(&str) -> Option<String>,
{
    let kind = turn
        .detection_type
        .or_else(|| env.string("TURN_DETECTION_TYPE"))
        .unwrap_or_else(|| "server_vad".to_string())
        .to_lowercase();

    match kind.as_str() {
        "server_vad" => {
            let (default_threshold, default_padding, default_silence) =
                match TurnDetectionConfig::default() {
                    TurnDetectionConfig::ServerVad {
                        threshold,
                        prefix_padding_ms,
                        silence_duration_ms,
                        ..
                    } => (threshold, prefix_padding_ms, silence_duration_ms),
                    _ => (None, None, None),
                };

            let threshold = turn
                .threshold
                .or_else(|| env.parsed("TURN_DETECTION_THRESHOLD", problems))
                .or(default_threshold);
            if let Some(value) = threshold
                && let Err(reason) = validate_unit_interval(value)
            {
                problems.invalid("TURN_DETECTION_THRESHOLD", &value.to_string(), reason);
            }

            TurnDetectionConfig::ServerVad {
                threshold,
                prefix_padding_ms: turn
                    .prefix_padding_ms
                    .or_else(|| env.parsed("TURN_DETECTION_PREFIX_PADDING_MS", problems))
                    .or(default_padding),
                silence_duration_ms: turn
                    .silence_duration_ms
                    .or_else(|| env.parsed("TURN_DETECTION_SILENCE_DURATION_MS", problems))
                    .or(default_silence),
                create_response: None,
                interrupt_response: None,
            }
        }
        "semantic_vad" => {
            let eagerness = turn
                .eagerness
                .or_else(|| env.string("TURN_DETECTION_EAGERNESS"))
                .map(|e| e.to_lowercase());
            if let Some(value) = eagerness.as_deref()
                && !EAGERNESS_VALUES.contains(&value)
            {
                problems.invalid(
                    "TURN_DETECTION_EAGERNESS",
                    value,
                    "expected low, medium, high or auto",
                );
            }
            TurnDetectionConfig::SemanticVad {
                eagerness,
                create_response: None,
                interrupt_response: None,
            }
        }
        "none" | "disabled" | "off" => TurnDetectionConfig::None,
        other => {
            problems.invalid(
                "TURN_DETECTION_TYPE",
                other,
                "expected server_vad, semantic_vad or none",
            );
            TurnDetectionConfig::default()
        }
    }
}

fn merge_relay<F>(
    env: &EnvReader<F>,
    relay: RelayYaml,
    problems: &mut Problems,
) -> (CommitPolicy, f32, AudioFraming)
where
    F: Fn(&str) -> Option<String>,
{
    let policy_name = relay
        .commit_policy
        .or_else(|| env.string("COMMIT_POLICY"));
    let mut commit_policy = match policy_name.as_deref() {
        None => CommitPolicy::default(),
        Some(name) => CommitPolicy::parse(name).unwrap_or_else(|| {
            problems.invalid("COMMIT_POLICY", name, "expected immediate or debounced");
            CommitPolicy::default()
        }),
    };

    if let CommitPolicy::Debounced {
        quiet_period_ms,
        max_buffered_ms,
        min_buffered_ms,
    } = &mut commit_policy
    {
        if let Some(v) = relay
            .commit_quiet_period_ms
            .or_else(|| env.parsed("COMMIT_QUIET_PERIOD_MS", problems))
        {
            *quiet_period_ms = v;
        }
        if let Some(v) = relay
            .commit_max_buffered_ms
            .or_else(|| env.parsed("COMMIT_MAX_BUFFERED_MS", problems))
        {
            *max_buffered_ms = v;
        }
        if let Some(v) = relay
            .commit_min_buffered_ms
            .or_else(|| env.parsed("COMMIT_MIN_BUFFERED_MS", problems))
        {
            *min_buffered_ms = v;
        }
        if *quiet_period_ms == 0 {
            problems.invalid("COMMIT_QUIET_PERIOD_MS", "0", "must be greater than 0");
        }
        if *min_buffered_ms > *max_buffered_ms {
            problems.invalid(
                "COMMIT_MIN_BUFFERED_MS",
                &min_buffered_ms.to_string(),
                "must not exceed COMMIT_MAX_BUFFERED_MS",
            );
        }
    }

    let silence_threshold = relay
        .silence_threshold
        .or_else(|| env.parsed("SILENCE_THRESHOLD", problems))
        .unwrap_or(DEFAULT_SILENCE_THRESHOLD);
    if let Err(reason) = validate_unit_interval(silence_threshold) {
        problems.invalid("SILENCE_THRESHOLD", &silence_threshold.to_string(), reason);
    }

    let audio_framing = match relay
        .audio_framing
        .or_else(|| env.string("AUDIO_FRAMING"))
    {
        None => AudioFraming::default(),
        Some(name) => AudioFraming::parse(&name).unwrap_or_else(|| {
            problems.invalid("AUDIO_FRAMING", &name, "expected binary or json");
            AudioFraming::default()
        }),
    };

    (commit_policy, silence_threshold, audio_framing)
}

fn merge_interruption<F>(
    env: &EnvReader<F>,
    interruption: InterruptionYaml,
    problems: &mut Problems,
) -> (InterruptionConfig, u64)
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = InterruptionConfig::default();

    let threshold = interruption
        .threshold
        .or_else(|| env.parsed("INTERRUPT_THRESHOLD", problems))
        .unwrap_or(defaults.threshold);
    if let Err(reason) = validate_level(threshold) {
        problems.invalid("INTERRUPT_THRESHOLD", &threshold.to_string(), reason);
    }

    let config = InterruptionConfig {
        threshold,
        confirmation_ms: interruption
            .confirm_ms
            .or_else(|| env.parsed("INTERRUPT_CONFIRM_MS", problems))
            .unwrap_or(defaults.confirmation_ms),
        cooldown_ms: interruption
            .cooldown_ms
            .or_else(|| env.parsed("INTERRUPT_COOLDOWN_MS", problems))
            .unwrap_or(defaults.cooldown_ms),
    };
    let recovery_ms = interruption
        .recovery_ms
        .or_else(|| env.parsed("INTERRUPT_RECOVERY_MS", problems))
        .unwrap_or(DEFAULT_RECOVERY_MS);

    (config, recovery_ms)
}
