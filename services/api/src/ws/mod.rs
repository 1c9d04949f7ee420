//! ConversationRelay WebSocket handling
//!
//! - `protocol`: the JSON messages exchanged with Twilio.
//! - `relay`: per-call state and the prompt-to-reply logic.
//! - `session`: the socket lifecycle, from upgrade to close.

pub mod protocol;
pub mod relay;
pub mod session;

pub use session::ws_handler;
