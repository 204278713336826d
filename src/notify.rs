use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per iteration.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to events for an iteration. Creates the channel if needed.
    pub fn subscribe(&self, iteration_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(iteration_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a committed event. No-op if nobody is listening on its iteration.
    pub fn send(&self, event: &Event) {
        let Some(iteration_id) = event.iteration_id() else {
            return;
        };
        if let Some(sender) = self.channels.get(&iteration_id) {
            let _ = sender.send(event.clone());
        }
    }
}
