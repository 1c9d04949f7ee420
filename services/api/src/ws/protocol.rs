//! Defines the ConversationRelay message protocol between Twilio and the API server.

use serde::{Deserialize, Serialize};

/// Messages sent from Twilio to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Sent once when the relay connects.
    Setup {
        #[serde(rename = "callSid")]
        call_sid: String,
    },
    /// A finished transcription of something the caller said.
    Prompt {
        #[serde(rename = "voicePrompt")]
        voice_prompt: String,
    },
    /// An error reported by the platform.
    Error { description: String },
    /// Any other message type (`interrupt`, `dtmf`, ...).
    #[serde(other)]
    Unknown,
}

/// Messages sent from the server to Twilio.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Text for Twilio to speak. `last` marks the final token of a reply.
    Text { token: String, last: bool },
    /// Ends the conversation and hangs up the call.
    End,
}

impl OutboundMessage {
    /// A complete spoken reply; the conversation continues afterwards.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Text {
            token: text.into(),
            last: false,
        }
    }

    /// One piece of a streamed reply.
    pub fn token(text: impl Into<String>, last: bool) -> Self {
        Self::Text {
            token: text.into(),
            last,
        }
    }

    pub fn end() -> Self {
        Self::End
    }
}
