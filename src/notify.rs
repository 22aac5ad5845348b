use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::flow::FlowTransition;
use crate::model::RoomId;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking-flow transitions, one channel per room.
pub struct NotifyHub {
    channels: DashMap<RoomId, broadcast::Sender<FlowTransition>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a room's transitions. Creates the channel if needed.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<FlowTransition> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, room_id: RoomId, transition: &FlowTransition) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(transition.clone());
        }
    }

    /// Drop the room's channel once its last subscriber is gone.
    pub fn prune(&self, room_id: RoomId) {
        self.channels.remove_if(&room_id, |_, sender| sender.receiver_count() == 0);
    }
}
