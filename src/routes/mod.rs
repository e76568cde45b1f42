//! Router assembly

use std::sync::Arc;

use axum::Router;
use http::{Method, header::CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod api;
pub mod relay;

/// Build the complete application router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors_layer = cors_layer(app_state.config.cors_allowed_origins.as_deref());

    api::create_api_router()
        .merge(relay::create_relay_router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

/// `*` or no setting allows any origin; otherwise a comma separated allow-list.
fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    match origins.map(str::trim) {
        None | Some("") | Some("*") => base.allow_origin(Any),
        Some(list) => {
            let origins: Vec<_> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins)
        }
    }
}
