use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::core::session::StatsSnapshot;
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Live relay sessions
    pub clients: usize,
    pub stats: StatsSnapshot,
}

/// Liveness plus the current session count.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    Json(HealthResponse {
        status: "OK",
        timestamp,
        clients: state.sessions.len(),
        stats: state.stats.snapshot(),
    })
}
