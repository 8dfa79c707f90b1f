//! Live connection registry and event fan-out.

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::dto::ws::ServerMessage;

/// Handle used to push messages to one connected client.
///
/// Each connection has a dedicated writer task fed from this channel, so
/// events are delivered in emission order per peer.
#[derive(Clone)]
pub struct ListenerConnection {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Registry of live WebSocket connections.
#[derive(Default)]
pub struct BroadcastHub {
    connections: DashMap<Uuid, ListenerConnection>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: ListenerConnection) {
        self.connections.insert(connection.id, connection);
    }

    pub fn unregister(&self, id: Uuid) {
        self.connections.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Fan an event out to every live connection. Peers whose writer has gone
    /// away are dropped from the registry.
    pub fn broadcast(&self, message: &ServerMessage) {
        let Some(frame) = encode(message) else { return };

        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            if entry.tx.send(frame.clone()).is_err() {
                dead.push(entry.id);
            }
        }
        for id in dead {
            self.connections.remove(&id);
            warn!(connection = %id, "dropping connection with closed writer");
        }
    }

    /// Send an event to a single connection. Returns `false` when the peer is
    /// unknown or its writer has gone away.
    pub fn send_to(&self, id: Uuid, message: &ServerMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        let Some(connection) = self.connections.get(&id) else {
            return false;
        };

        if connection.tx.send(frame).is_err() {
            drop(connection);
            self.connections.remove(&id);
            return false;
        }
        true
    }

    /// Close and forget a connection (used after a takeover eviction).
    pub fn kick(&self, id: Uuid) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            let _ = connection.tx.send(Message::Close(None));
        }
    }
}

/// Serialize an event into a text frame, logging serialization bugs instead
/// of propagating them into the playback path.
fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(hub: &BroadcastHub) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        hub.register(ListenerConnection { id, tx });
        (id, rx)
    }

    fn message_type(frame: Message) -> String {
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_listener_in_order() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = attach(&hub);
        let (_b, mut rx_b) = attach(&hub);

        hub.broadcast(&ServerMessage::QueueUpdated);
        hub.broadcast(&ServerMessage::SongEnded);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(message_type(rx.recv().await.unwrap()), "queue-updated");
            assert_eq!(message_type(rx.recv().await.unwrap()), "song-ended");
        }
    }

    #[tokio::test]
    async fn send_to_targets_a_single_connection() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = attach(&hub);
        let (_b, mut rx_b) = attach(&hub);

        assert!(hub.send_to(a, &ServerMessage::AdminActive));
        assert_eq!(message_type(rx_a.recv().await.unwrap()), "admin-active");
        assert!(rx_b.try_recv().is_err());
        assert!(!hub.send_to(Uuid::new_v4(), &ServerMessage::AdminActive));
    }

    #[tokio::test]
    async fn closed_writers_are_pruned_on_broadcast() {
        let hub = BroadcastHub::new();
        let (_a, rx_a) = attach(&hub);
        let (_b, _rx_b) = attach(&hub);
        drop(rx_a);

        hub.broadcast(&ServerMessage::QueueUpdated);
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test]
    async fn kick_closes_and_forgets() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = attach(&hub);

        hub.kick(a);
        assert!(matches!(rx_a.recv().await, Some(Message::Close(_))));
        assert!(hub.is_empty());
    }
}
