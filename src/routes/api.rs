use axum::{Router, routing::get};

use crate::handlers::health_check;
use crate::state::AppState;
use std::sync::Arc;

/// Create the public HTTP router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
