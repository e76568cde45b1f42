//! Input-commit strategies.
//!
//! - `Immediate`: every forwarded frame is followed by commit + response request.
//! - `Debounced`: audio accumulates and is committed after a quiet period or
//!   once enough is buffered. Short buffers are cleared instead of committed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_QUIET_PERIOD_MS: u64 = 2000;
pub const DEFAULT_MAX_BUFFERED_MS: u64 = 5000;
pub const DEFAULT_MIN_BUFFERED_MS: u64 = 500;

/// How buffered input audio becomes a committed user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommitPolicy {
    #[default]
    Immediate,
    Debounced {
        /// Commit after this long without new audio
        quiet_period_ms: u64,
        /// Commit as soon as this much audio is buffered
        max_buffered_ms: u64,
        /// Buffers shorter than this are discarded
        min_buffered_ms: u64,
    },
}

impl CommitPolicy {
    /// Debounced policy with default timings.
    pub fn debounced() -> Self {
        CommitPolicy::Debounced {
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            max_buffered_ms: DEFAULT_MAX_BUFFERED_MS,
            min_buffered_ms: DEFAULT_MIN_BUFFERED_MS,
        }
    }

    /// Parse a policy name. Debounced timings are the defaults.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" | "per_frame" | "per-frame" => Some(CommitPolicy::Immediate),
            "debounced" | "batch" => Some(Self::debounced()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommitPolicy::Immediate => "immediate",
            CommitPolicy::Debounced { .. } => "debounced",
        }
    }

    /// Quiet period of a debounced policy.
    pub fn quiet_period(&self) -> Option<Duration> {
        match self {
            CommitPolicy::Immediate => None,
            CommitPolicy::Debounced {
                quiet_period_ms, ..
            } => Some(Duration::from_millis(*quiet_period_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(CommitPolicy::parse("immediate"), Some(CommitPolicy::Immediate));
        assert_eq!(CommitPolicy::parse(" Debounced "), Some(CommitPolicy::debounced()));
        assert_eq!(CommitPolicy::parse("sometimes"), None);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(CommitPolicy::default(), CommitPolicy::Immediate);
        assert_eq!(CommitPolicy::Immediate.quiet_period(), None);
        assert_eq!(
            CommitPolicy::debounced().quiet_period(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(CommitPolicy::debounced().name(), "debounced");
    }

    #[test]
    fn test_yaml_shape() {
        let policy: CommitPolicy = serde_yaml::from_str(
            "mode: debounced\nquiet_period_ms: 1000\nmax_buffered_ms: 3000\nmin_buffered_ms: 200\n",
        )
        .unwrap();
        assert_eq!(
            policy,
            CommitPolicy::Debounced {
                quiet_period_ms: 1000,
                max_buffered_ms: 3000,
                min_buffered_ms: 200
            }
        );
    }
}
