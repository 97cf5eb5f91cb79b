//! HTTP and WebSocket entry points.

pub mod connections;
pub mod http;
pub mod hub;

use std::sync::Arc;

use axum::{routing::get, Router};
use gamelink_shared::protocol::HUB_PATH;
use tower_http::trace::TraceLayer;

use crate::app::App;

/// Full Engine router: HTTP routes plus the agent hub.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .merge(http::routes())
        .route(HUB_PATH, get(hub::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
