use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::session::{RelayStats, SessionRegistry};

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    /// Live relay sessions
    pub sessions: Arc<SessionRegistry>,
    /// Process-wide relay counters
    pub stats: Arc<RelayStats>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            stats: Arc::new(RelayStats::new()),
        })
    }
}
