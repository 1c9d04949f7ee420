//! Manages the ConversationRelay WebSocket connection lifecycle for one call.

use super::{protocol::OutboundMessage, relay::CallSession};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual relay connection.
///
/// Frames are handled strictly one at a time: the next frame is not read
/// until every reply to the previous one, including its Langflow round trip,
/// has been sent. A streamed reply is forwarded token by token as it arrives.
#[instrument(name = "relay_session", skip_all, fields(connection_id, call_sid))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New ConversationRelay connection.");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut session = CallSession::new(
        state.chat_flow.clone(),
        state.config.langflow_streaming,
    );

    'frames: while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let mut replies = session.handle_frame(text.as_str());
                while let Some(reply) = replies.next().await {
                    if let Err(e) = send_msg(&mut socket_tx, reply).await {
                        error!(error = ?e, "Failed to send relay message.");
                        break 'frames;
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                warn!(bytes = data.len(), "Ignoring binary frame.");
            }
            Ok(Message::Close(_)) => {
                info!("Twilio sent close frame.");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                error!("Error receiving from relay WebSocket: {:?}", e);
                break;
            }
        }
    }

    info!(call_sid = ?session.call_sid(), "WebSocket connection closed.");
}

/// A helper function to serialize and send an `OutboundMessage` to Twilio.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: OutboundMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
