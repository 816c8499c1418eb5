use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-room change feed. Device bridges (locks, lighting, climate) subscribe
/// to a room and receive every event logged against it, in log order.
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

    /// Subscribe to a room's events. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send an event. No-op if nobody is listening. A removed room's channel
    /// is dropped after the removal event goes out, which ends its receivers.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
        if matches!(event, Event::RoomRemoved { .. }) {
            self.channels.remove(&room_id);
        }
    }

    pub fn subscriber_count(&self, room_id: &Ulid) -> usize {
        self.channels
            .get(room_id)
            .map_or(0, |s| s.receiver_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = Event::ControlsChanged {
            room_id: rid,
            change: ControlChange::DoNotDisturb(true),
            by: Ulid::new(),
            at: 1,
        };
        hub.send(rid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(hub.subscriber_count(&rid), 1);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(rid, &Event::RoomStatusChanged { id: rid, status: RoomStatus::Cleaning });
        assert_eq!(hub.subscriber_count(&rid), 0);
    }

    #[tokio::test]
    async fn room_removal_closes_the_feed() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);
        hub.send(rid, &Event::RoomRemoved { id: rid });

        assert_eq!(rx.recv().await.unwrap(), Event::RoomRemoved { id: rid });
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
