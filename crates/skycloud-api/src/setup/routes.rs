//! Route table

use crate::handlers::{health, raw, upload};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use skycloud_core::Config;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Upper bound for a single upload request, including slow clients.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(config.max_file_size_bytes()).unwrap_or(usize::MAX);

    let upload_routes = Router::new()
        .route("/api/upload", post(upload::upload_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(UPLOAD_TIMEOUT));

    Router::new()
        .merge(upload_routes)
        .route("/raw/{name}", get(raw::serve_raw))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
