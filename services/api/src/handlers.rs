//! Axum Handlers for the HTTP endpoints
//!
//! The only REST surface is the Twilio voice webhook; its `utoipa` doc
//! comment feeds the generated OpenAPI document.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;

use crate::{router::ApiDoc, state::AppState, twiml};

/// Answer an incoming call by connecting it to the relay WebSocket.
#[utoipa::path(
    post,
    path = "/voice",
    responses(
        (status = 200, description = "TwiML connecting the call to the ConversationRelay WebSocket", body = String, content_type = "text/xml")
    )
)]
pub async fn voice_webhook(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let relay_url = state.config.relay_url();
    info!(%relay_url, "Incoming call. Connecting to ConversationRelay.");
    let document = twiml::conversation_relay(&relay_url, &state.config.welcome_greeting);
    ([(header::CONTENT_TYPE, "text/xml")], document)
}

/// Serves the OpenAPI document for this service.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
