//! Client Broadcast Listener (C8): forwards every session event,
//! unchanged, to the Client Hub room for this session.

use std::sync::Arc;

use super::client_hub::ClientHub;
use crate::bus::SessionBus;

pub struct ClientBroadcastListener;

impl ClientBroadcastListener {
    pub fn attach(bus: &SessionBus, hub: Arc<ClientHub>, session_id: String) {
        let room = ClientHub::room_key(&session_id);
        bus.subscribe_all(move |event| {
            hub.broadcast(&room, event.clone());
        });
    }
}
