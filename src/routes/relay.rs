//! Relay WebSocket route configuration

use axum::{Router, routing::get};

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoints
///
/// `GET /` and `GET /ws` - WebSocket upgrade for a voice relay session
///
/// # Example
///
/// ```json
/// // Client opens the upstream link
/// {"type": "connect"}
///
/// // Server responds once the link is configured
/// {"type": "connected", "session_id": "..."}
///
/// // Client streams microphone audio as binary frames (0x01 + PCM16)
/// // Server streams reply audio as binary frames (0x02 + PCM16)
/// ```
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(relay_handler))
        .route("/ws", get(relay_handler))
}
