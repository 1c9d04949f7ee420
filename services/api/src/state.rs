//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration
//! and the chat-flow client shared by every call.

use crate::config::Config;
use std::sync::Arc;
use voice_relay_core::ChatFlowClient;

/// The shared application state, created once at startup and passed to all handlers.
/// Nothing in it is mutable: calls never share state with each other.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chat_flow: Arc<dyn ChatFlowClient>,
}
