//! WebSocket connection handling.
//!
//! One task pair per connection: a writer task draining the connection's
//! outbound frame channel (per-connection FIFO), and this function's receive
//! loop forwarding inbound frames to the hub. The channel tag is fixed at
//! upgrade time and never changes for the connection's lifetime.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::hub::{HubHandle, HubMsg};
use crate::protocol::Channel;

/// Run a client connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, channel: Channel, hub: HubHandle) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = hub.allocate_conn();

    // Subscribing pushes the channel's current snapshot to this connection
    // before it can observe any delta.
    hub.send(HubMsg::Subscribe { id, channel, tx });
    tracing::info!(conn = id, channel = %channel, "WebSocket connected");

    // Writer task: outbound frames, in hub-broadcast order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break; // Connection closed
            }
        }
    });

    // Receive loop: forward client frames to the hub.
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                hub.send(HubMsg::Frame { id, channel, text });
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(conn = id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::debug!(conn = id, error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong — axum answers pings itself
        }
    }

    // Unregistration is idempotent; a broadcast racing this close is either
    // delivered harmlessly or dropped once removal completes.
    hub.send(HubMsg::Unsubscribe { id });
    writer.abort();
    tracing::info!(conn = id, channel = %channel, "WebSocket disconnected");
}
