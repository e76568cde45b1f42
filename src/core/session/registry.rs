//! Registry of live relay sessions.
//!
//! Sessions are inserted when a client socket is upgraded and removed when
//! the returned [`SessionGuard`] drops, on every exit path of the handler.
//! The registry holds no session state, only what shutdown and `/health`
//! need: a creation time and a cancellation token per session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub created_at: Instant,
    pub cancel: CancellationToken,
}

/// Concurrent map of session id to entry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The session is removed when the guard drops.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> SessionGuard {
        let id = id.into();
        let cancel = CancellationToken::new();
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                created_at: Instant::now(),
                cancel: cancel.clone(),
            },
        );
        debug!(session_id = %id, live = self.sessions.len(), "Session registered");
        SessionGuard {
            registry: Arc::clone(self),
            id,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Ask every live session to close.
    pub fn close_all(&self) {
        let count = self.sessions.len();
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
        if count > 0 {
            info!(count, "Closing all sessions");
        }
    }

    fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            debug!(session_id = %id, live = self.sessions.len(), "Session removed");
        }
    }
}

/// Keeps a session registered for as long as it lives.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the server asks this session to close.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
