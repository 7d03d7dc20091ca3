//! Concrete Client Hub (§4.8.1): rooms backed by `tokio::sync::broadcast`
//! channels, created lazily and dropped once their last receiver goes
//! away. Stands in for the out-of-scope WebSocket transport — a real
//! transport would bridge a room's receiver stream onto a socket.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::event::SessionEvent;

const ROOM_CAPACITY: usize = 256;

pub struct ClientHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<SessionEvent>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<SessionEvent> {
        if let Some(sender) = self.rooms.read().unwrap().get(room) {
            return sender.subscribe();
        }
        let mut rooms = self.rooms.write().unwrap();
        let sender = rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0);
        sender.subscribe()
    }

    /// Best-effort broadcast: no receivers is the documented drop, not an
    /// error.
    pub fn broadcast(&self, room: &str, event: SessionEvent) {
        let rooms = self.rooms.read().unwrap();
        if let Some(sender) = rooms.get(room) {
            let _ = sender.send(event);
        }
    }

    pub fn room_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_broadcast_event() {
        let hub = ClientHub::new();
        let mut rx = hub.subscribe("session:s1");
        hub.broadcast("session:s1", SessionEvent::new("status:changed", serde_json::json!({})));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "status:changed");
    }

    #[test]
    fn broadcast_with_no_subscribers_is_not_an_error() {
        let hub = ClientHub::new();
        hub.broadcast("session:nobody", SessionEvent::new("x", serde_json::json!({})));
    }

    #[tokio::test]
    async fn separate_rooms_do_not_cross_deliver() {
        let hub = ClientHub::new();
        let mut rx_a = hub.subscribe("session:a");
        let mut rx_b = hub.subscribe("session:b");
        hub.broadcast("session:a", SessionEvent::new("x", serde_json::json!({})));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn room_key_format() {
        assert_eq!(ClientHub::room_key("s1"), "session:s1");
    }
}
