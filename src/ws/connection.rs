//! WebSocket connection read loop and transport adapter.
//!
//! The socket is split on upgrade: the write half becomes a [`WsTransport`]
//! owned by the connection's delivery loop, while the read half stays here
//! and dispatches client commands until the peer goes away.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use super::messages::{self, ClientCommand};
use crate::domain::topic_index::validate_topic;
use crate::domain::{Connection, ConnectionId, Message, Transport};
use crate::error::TransportError;
use crate::service::Relay;

/// [`Transport`] over the write half of an axum WebSocket.
pub struct WsTransport {
    sink: SplitSink<WebSocket, WsFrame>,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Wraps the write half of a socket.
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, WsFrame>) -> Self {
        Self { sink }
    }
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.sink
                .send(WsFrame::text(text))
                .await
                .map_err(|e| TransportError::Write(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.sink.close().await {
                tracing::debug!(error = %err, "websocket close failed");
            }
        })
    }
}

/// Runs a single WebSocket connection until the client disconnects.
///
/// - Registers the write half with the relay under `identity`.
/// - Reads commands from the client and answers through the connection's
///   own mailbox, so replies stay ordered with relayed events.
/// - On close or read error, disconnects this session (a newer connection
///   for the same identity is left alone).
pub async fn run_connection(socket: WebSocket, identity: ConnectionId, relay: Arc<Relay>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let connection = relay.connect(identity.clone(), WsTransport::new(ws_tx)).await;
    let session = connection.session();

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsFrame::Text(text)) => {
                let reply = handle_text_message(text.as_str(), &connection, &relay).await;
                if let Some(reply) = reply {
                    relay.reply(&connection, reply);
                }
            }
            Ok(WsFrame::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(%identity, %session, error = %err, "websocket read failed");
                break;
            }
        }
    }

    relay.disconnect_session(&identity, session).await;
    tracing::debug!(%identity, %session, "ws connection closed");
}

/// Handles a text frame from the client, returning the reply to send.
async fn handle_text_message(
    text: &str,
    connection: &Connection,
    relay: &Relay,
) -> Option<Message> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(err) => return Some(messages::rejected(format!("malformed command: {err}"))),
    };
    if !connection.is_active() {
        // Replaced or torn down while this frame was in flight.
        return None;
    }
    let identity = connection.identity();

    match command {
        ClientCommand::Subscribe { topic } => {
            if let Err(err) = validate_topic(&topic) {
                return Some(messages::rejected(err.to_string()));
            }
            relay
                .subscribe(identity, &topic)
                .await
                .then(|| messages::subscribed(&topic))
        }
        ClientCommand::Unsubscribe { topic } => relay
            .unsubscribe(identity, &topic)
            .await
            .then(|| messages::unsubscribed(&topic)),
        ClientCommand::Ping => Some(messages::pong()),
    }
}
