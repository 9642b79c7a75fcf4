//! Channel-scoped connection fan-out.
//!
//! Tracks every open client connection with its channel tag and broadcasts
//! text frames to all connections on a channel, in registration order. Each
//! subscriber is an unbounded sender feeding that connection's writer task,
//! so one slow or dead connection never stalls the others — a failed send
//! just unregisters the subscriber.
//!
//! The fan-out is owned by the hub task; all mutation happens there, which
//! keeps snapshot broadcasts for a channel in generation order.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::Channel;

/// Connection identifier, allocated by the hub handle.
pub type ConnId = u64;

/// Per-connection outbound frame sender. Frames are already-serialized JSON
/// text; the connection's writer task turns them into WebSocket messages in
/// FIFO order.
pub type FrameSender = mpsc::UnboundedSender<String>;

struct Subscriber {
    id: ConnId,
    channel: Channel,
    tx: FrameSender,
}

#[derive(Default)]
pub struct Fanout {
    subscribers: Vec<Subscriber>,
    /// Latest snapshot frame broadcast per channel, replayed to late joiners
    /// of channels whose documents the hub does not own itself.
    snapshots: HashMap<Channel, String>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the broadcast set for `channel`. Many connections
    /// may share a channel; a connection keeps its channel for life.
    pub fn register(&mut self, id: ConnId, channel: Channel, tx: FrameSender) {
        tracing::debug!(conn = id, channel = %channel, "Connection registered");
        self.subscribers.push(Subscriber { id, channel, tx });
    }

    /// Remove a connection. Idempotent; safe to call from the connection's
    /// own close path while a broadcast to it is still in flight.
    pub fn unregister(&mut self, id: ConnId) {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        if self.subscribers.len() != before {
            tracing::debug!(conn = id, "Connection unregistered");
        }
    }

    /// Send one frame to every connection on `channel`, in registration
    /// order. A failed delivery unregisters that connection and the
    /// broadcast continues with the rest.
    pub fn broadcast(&mut self, channel: Channel, frame: &str) {
        self.subscribers.retain(|s| {
            if s.channel != channel {
                return true;
            }
            if s.tx.send(frame.to_owned()).is_ok() {
                true
            } else {
                tracing::debug!(conn = s.id, channel = %channel, "Dropping dead connection");
                false
            }
        });
    }

    /// Serialize `doc` and broadcast it as the channel's current snapshot,
    /// caching it for late joiners.
    pub fn broadcast_snapshot<T: Serialize>(&mut self, channel: Channel, doc: &T) {
        let frame = match serde_json::to_string(doc) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Snapshot serialization failed");
                return;
            }
        };
        self.snapshots.insert(channel, frame.clone());
        self.broadcast(channel, &frame);
    }

    /// Send one frame to a single connection, unregistering it on failure.
    pub fn send_to(&mut self, id: ConnId, frame: &str) {
        let dead = match self.subscribers.iter().find(|s| s.id == id) {
            Some(s) => s.tx.send(frame.to_owned()).is_err(),
            None => false,
        };
        if dead {
            self.unregister(id);
        }
    }

    /// Serialize `doc` and push it to a single connection — the late-join
    /// snapshot path.
    pub fn send_snapshot_to<T: Serialize>(&mut self, id: ConnId, doc: &T) {
        match serde_json::to_string(doc) {
            Ok(frame) => self.send_to(id, &frame),
            Err(e) => tracing::error!(conn = id, error = %e, "Snapshot serialization failed"),
        }
    }

    /// Latest snapshot frame broadcast on `channel`, if any.
    pub fn cached_snapshot(&self, channel: Channel) -> Option<&str> {
        self.snapshots.get(&channel).map(String::as_str)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
