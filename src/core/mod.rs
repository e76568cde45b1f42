pub mod audio;
pub mod realtime;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{PlaybackScheduler, VoiceActivityGate};

pub use realtime::{
    BaseRealtime, BoxedRealtime, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeProvider,
    RealtimeResult, UpstreamEvent, create_realtime_provider, get_supported_realtime_providers,
};

pub use session::{
    CommitPolicy, RelayStats, Session, SessionPolicy, SessionRegistry, SessionState,
};
