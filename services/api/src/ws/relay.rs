//! Per-call relay logic: turns inbound ConversationRelay events into replies.

use super::protocol::{InboundEvent, OutboundMessage};
use futures_util::{Stream, StreamExt, stream};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};
use voice_relay_core::{ChatFlowClient, ForwardError, TokenStream};

/// Spoken when Langflow answers with an error status or a failed run.
pub const LANGFLOW_API_APOLOGY: &str =
    "I'm sorry, an application error has occurred with the Langflow API.";
/// Spoken when Langflow could not be reached or its reply was unreadable.
pub const GENERIC_APOLOGY: &str = "I'm sorry, an application error has occurred.";

/// Messages produced by one inbound frame, in the order they must be sent.
///
/// Nothing is requested from Langflow until the stream is polled.
pub type Replies = Pin<Box<dyn Stream<Item = OutboundMessage> + Send>>;

/// State of one relay connection.
///
/// The call SID arrives with the `setup` event and becomes the Langflow
/// session id for every later prompt. Prompts that arrive before `setup` are
/// forwarded without a session id.
pub struct CallSession {
    chat_flow: Arc<dyn ChatFlowClient>,
    streaming: bool,
    call_sid: Option<String>,
}

impl CallSession {
    /// With `streaming` set, replies are relayed token by token as Langflow
    /// generates them.
    pub fn new(chat_flow: Arc<dyn ChatFlowClient>, streaming: bool) -> Self {
        Self {
            chat_flow,
            streaming,
            call_sid: None,
        }
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    /// Handles one raw text frame. Frames that do not parse are logged and
    /// produce no messages.
    pub fn handle_frame(&mut self, frame: &str) -> Replies {
        match serde_json::from_str::<InboundEvent>(frame) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!(error = %e, %frame, "Discarding malformed relay message");
                no_replies()
            }
        }
    }

    /// Handles one parsed event.
    pub fn handle_event(&mut self, event: InboundEvent) -> Replies {
        match event {
            InboundEvent::Setup { call_sid } => {
                if let Some(previous) = self.call_sid.as_deref().filter(|p| *p != call_sid) {
                    warn!(%previous, %call_sid, "Repeated setup replaces the call SID");
                }
                info!(%call_sid, "Conversation started");
                tracing::Span::current().record("call_sid", call_sid.as_str());
                self.call_sid = Some(call_sid);
                no_replies()
            }
            InboundEvent::Prompt { voice_prompt } => self.forward_prompt(voice_prompt),
            InboundEvent::Error { description } => {
                error!(%description, "ConversationRelay error");
                no_replies()
            }
            InboundEvent::Unknown => {
                warn!("Unknown message type");
                no_replies()
            }
        }
    }

    fn forward_prompt(&self, voice_prompt: String) -> Replies {
        info!(prompt = %voice_prompt, streaming = self.streaming, "Processing prompt");
        let chat_flow = self.chat_flow.clone();
        let session_id = self.call_sid.clone();

        if self.streaming {
            return stream_reply(chat_flow, voice_prompt, session_id);
        }

        let batch = async move {
            match chat_flow.run_flow(voice_prompt, session_id).await {
                Ok(reply) => {
                    info!(response = %reply, "Response");
                    vec![OutboundMessage::reply(reply)]
                }
                Err(e) => apology(e),
            }
        };
        Box::pin(stream::once(batch).flat_map(stream::iter))
    }
}

fn no_replies() -> Replies {
    Box::pin(stream::empty())
}

fn apology(e: ForwardError) -> Vec<OutboundMessage> {
    error!(error = %e, "Error processing prompt or calling Langflow");
    let apology = match e {
        ForwardError::RemoteApi { .. } | ForwardError::FlowError(_) => LANGFLOW_API_APOLOGY,
        ForwardError::Transport(_) | ForwardError::MalformedResponse(_) => GENERIC_APOLOGY,
    };
    vec![OutboundMessage::reply(apology), OutboundMessage::end()]
}

enum StreamingTurn {
    Pending {
        chat_flow: Arc<dyn ChatFlowClient>,
        voice_prompt: String,
        session_id: Option<String>,
    },
    Relaying {
        tokens: TokenStream,
        held: Option<String>,
        spoken: String,
    },
    Done,
}

/// Relays a streamed run. Each token is held back until the next one arrives
/// so the final token can be sent with `last: true`.
fn stream_reply(
    chat_flow: Arc<dyn ChatFlowClient>,
    voice_prompt: String,
    session_id: Option<String>,
) -> Replies {
    let turn = StreamingTurn::Pending {
        chat_flow,
        voice_prompt,
        session_id,
    };
    let batches = stream::unfold(turn, |turn| async move {
        let (mut tokens, mut held, mut spoken) = match turn {
            StreamingTurn::Done => return None,
            StreamingTurn::Pending {
                chat_flow,
                voice_prompt,
                session_id,
            } => match chat_flow.stream_flow(voice_prompt, session_id).await {
                Ok(tokens) => (tokens, None, String::new()),
                Err(e) => return Some((apology(e), StreamingTurn::Done)),
            },
            StreamingTurn::Relaying {
                tokens,
                held,
                spoken,
            } => (tokens, held, spoken),
        };

        loop {
            match tokens.next().await {
                Some(Ok(token)) => {
                    spoken.push_str(&token);
                    if let Some(previous) = held.replace(token) {
                        let batch = vec![OutboundMessage::token(previous, false)];
                        let turn = StreamingTurn::Relaying {
                            tokens,
                            held,
                            spoken,
                        };
                        return Some((batch, turn));
                    }
                }
                Some(Err(e)) => {
                    let mut batch: Vec<_> = held
                        .map(|previous| OutboundMessage::token(previous, false))
                        .into_iter()
                        .collect();
                    batch.extend(apology(e));
                    return Some((batch, StreamingTurn::Done));
                }
                None => {
                    info!(response = %spoken, "Response");
                    let batch = held
                        .map(|last| OutboundMessage::token(last, true))
                        .into_iter()
                        .collect();
                    return Some((batch, StreamingTurn::Done));
                }
            }
        }
    });
    Box::pin(batches.flat_map(stream::iter))
}
