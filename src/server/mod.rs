//! HTTP API and agent WebSocket endpoint
//!
//! Thin plumbing over the [`Bridge`] core: every handler resolves a
//! session and drives the correlation engine; nothing here owns
//! concurrency state of its own.

mod handler;
mod ws;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use axum::routing::{delete, get};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
}

/// Create the router with all caller endpoints and the agent socket.
pub fn router(bridge: Arc<Bridge>, config: &BridgeConfig) -> Router {
    let state = AppState { bridge };
    let mut router = Router::new()
        .route("/call", get(handler::call_query).post(handler::call_json))
        .route("/execjs", get(handler::execjs_query).post(handler::execjs_json))
        .route("/cookies", get(handler::get_cookies))
        .route("/html", get(handler::get_html))
        .route("/list", get(handler::list_groups))
        .route("/details", get(handler::list_details))
        .route("/kick", delete(handler::kick))
        .route("/healthz", get(handler::healthz))
        .route("/ws", get(ws::agent_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.server.cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}
