//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application:
//! the Twilio voice webhook, the relay WebSocket and the OpenAPI document.

use crate::{handlers, state::AppState, ws::ws_handler};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::voice_webhook),
    tags(
        (name = "Voice Relay", description = "Twilio ConversationRelay bridge to a Langflow chat flow")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/voice", post(handlers::voice_webhook))
        .route("/ws", get(ws_handler))
        .route("/api-docs/openapi.json", get(handlers::openapi_json))
        .with_state(app_state)
}
