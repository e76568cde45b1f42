//! Relay sessions.
//!
//! - [`machine`]: the per-connection voice-turn state machine
//! - [`commit`]: input-commit strategies
//! - [`registry`]: live session bookkeeping
//! - [`stats`]: process-wide counters

pub mod commit;
pub mod machine;
pub mod registry;
pub mod state;
pub mod stats;

pub use commit::CommitPolicy;
pub use machine::{
    ClientNotice, DEFAULT_PREROLL_MS, DEFAULT_RECOVERY_MS, FrameDisposition, Session,
    SessionAction, SessionPolicy, UpstreamCommand,
};
pub use registry::{SessionEntry, SessionGuard, SessionRegistry};
pub use state::SessionState;
pub use stats::{RelayStats, StatsSnapshot};
