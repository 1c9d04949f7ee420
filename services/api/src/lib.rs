//! Voice Relay API Library Crate
//!
//! This library contains the web-facing half of the voice relay: configuration,
//! the Twilio voice webhook, the ConversationRelay WebSocket session and the
//! routing that ties them together. The `api` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod twiml;
pub mod ws;
