//! Call-control documents returned to Twilio.

use quick_xml::escape::escape;

/// Builds the TwiML that connects the call to a ConversationRelay WebSocket.
///
/// Twilio speaks `welcome_greeting` once the relay is open, then streams the
/// caller's transcribed speech to `url`.
pub fn conversation_relay(url: &str, welcome_greeting: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><ConversationRelay url="{}" welcomeGreeting="{}"/></Connect></Response>"#,
        escape(url),
        escape(welcome_greeting),
    )
}
