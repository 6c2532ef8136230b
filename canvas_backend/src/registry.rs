use crate::{
    broadcaster::{Broadcaster, ChannelSink, ListenerId, Sink},
    room_state::RoomState,
    shared_types::Notification,
};
use futures_util::Stream;
use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};

/// One drawing room. The state lock is what serialises commands for it.
#[derive(Debug, Default)]
pub struct Room {
    pub state: Mutex<RoomState>,
}

/// Maps room ids to their state and their listeners.
///
/// Room state is created on first reference and kept for the life of the
/// process. Listener sets come and go: a room without listeners has no
/// entry in `broadcasters`.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    broadcasters: RwLock<HashMap<String, Mutex<Broadcaster>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(room = %room_id, "Created room");
            Arc::new(Room::default())
        });
        Arc::clone(room)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn listener_count(&self, room_id: &str) -> usize {
        match self.broadcasters.read().await.get(room_id) {
            Some(broadcaster) => broadcaster.lock().await.len(),
            None => 0,
        }
    }

    pub async fn subscribe(&self, room_id: &str, sink: Box<dyn Sink>) -> ListenerId {
        let mut broadcasters = self.broadcasters.write().await;
        let broadcaster = broadcasters.entry(room_id.to_string()).or_default();
        let listener = broadcaster.get_mut().subscribe(sink);
        debug!(room = %room_id, listener = %listener, "Listener subscribed");
        listener
    }

    pub async fn unsubscribe(&self, room_id: &str, listener: &str) -> bool {
        let mut broadcasters = self.broadcasters.write().await;
        let Some(broadcaster) = broadcasters.get_mut(room_id) else {
            return false;
        };

        let removed = broadcaster.get_mut().unsubscribe(listener);
        if broadcaster.get_mut().is_empty() {
            broadcasters.remove(room_id);
            debug!(room = %room_id, "Last listener left");
        }
        if removed {
            debug!(room = %room_id, listener = %listener, "Listener unsubscribed");
        }
        removed
    }

    /// Fan a notification out to the room's listeners.
    ///
    /// The broadcaster is looked up under the same lock `subscribe` takes,
    /// so a subscription that has completed always sees later publishes.
    pub async fn publish(&self, room_id: &str, notification: &Notification) -> usize {
        let (delivered, now_empty) = {
            let broadcasters = self.broadcasters.read().await;
            let Some(broadcaster) = broadcasters.get(room_id) else {
                return 0;
            };
            let mut broadcaster = broadcaster.lock().await;
            let delivered = broadcaster.publish(notification);
            (delivered, broadcaster.is_empty())
        };

        if now_empty {
            self.prune(room_id).await;
        }
        delivered
    }

    /// Subscribe a channel-backed listener and hand back its receiving end.
    pub async fn listen(self: &Arc<Self>, room_id: &str, buffer: usize) -> Subscription {
        let (sink, rx) = ChannelSink::channel(buffer);
        let listener = self.subscribe(room_id, Box::new(sink)).await;
        Subscription {
            registry: Arc::clone(self),
            room_id: room_id.to_string(),
            listener,
            rx,
            closed: false,
        }
    }

    async fn prune(&self, room_id: &str) {
        let mut broadcasters = self.broadcasters.write().await;
        if broadcasters
            .get_mut(room_id)
            .is_some_and(|broadcaster| broadcaster.get_mut().is_empty())
        {
            broadcasters.remove(room_id);
            debug!(room = %room_id, "Removed empty listener set");
        }
    }
}

/// A live listener registration. Yields the room's notifications and
/// unsubscribes when dropped.
pub struct Subscription {
    registry: Arc<RoomRegistry>,
    room_id: String,
    listener: ListenerId,
    rx: mpsc::Receiver<Notification>,
    closed: bool,
}

impl Subscription {
    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub async fn close(mut self) {
        self.closed = true;
        self.registry
            .unsubscribe(&self.room_id, &self.listener)
            .await;
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let room_id = std::mem::take(&mut self.room_id);
        let listener = std::mem::take(&mut self.listener);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unsubscribe(&room_id, &listener).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::tests::{FakeSink, sync};
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn get_or_create_returns_the_same_room() {
        let registry = RoomRegistry::new();

        let first = registry.get_or_create("r1").await;
        let second = registry.get_or_create("r1").await;
        let other = registry.get_or_create("r2").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.room_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_first_access_creates_one_room() {
        let registry = Arc::new(RoomRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create("busy").await })
            })
            .collect();

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }

        assert!(rooms.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn publish_only_reaches_the_given_room() {
        let registry = RoomRegistry::new();
        let in_room = FakeSink::default();
        let elsewhere = FakeSink::default();
        registry.subscribe("r1", Box::new(in_room.clone())).await;
        registry.subscribe("r2", Box::new(elsewhere.clone())).await;

        assert_eq!(registry.publish("r1", &sync(1)).await, 1);

        assert_eq!(in_room.received(), vec![sync(1)]);
        assert!(elsewhere.received().is_empty());
        assert_eq!(registry.publish("nobody-here", &sync(2)).await, 0);
    }

    #[tokio::test]
    async fn last_unsubscribe_removes_listener_set_but_keeps_state() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("r1").await;
        let listener = registry.subscribe("r1", Box::new(FakeSink::default())).await;
        assert_eq!(registry.listener_count("r1").await, 1);

        assert!(registry.unsubscribe("r1", &listener).await);

        assert_eq!(registry.listener_count("r1").await, 0);
        assert!(!registry.broadcasters.read().await.contains_key("r1"));
        assert!(Arc::ptr_eq(&room, &registry.get_or_create("r1").await));
    }

    #[tokio::test]
    async fn failed_delivery_prunes_empty_listener_set() {
        let registry = RoomRegistry::new();
        registry.subscribe("r1", Box::new(FakeSink::broken())).await;

        assert_eq!(registry.publish("r1", &sync(1)).await, 0);
        assert!(!registry.broadcasters.read().await.contains_key("r1"));
    }

    #[tokio::test]
    async fn subscription_receives_and_closes() {
        let registry = Arc::new(RoomRegistry::new());
        let mut subscription = registry.listen("r1", 8).await;

        registry.publish("r1", &sync(1)).await;
        assert_eq!(subscription.next().await, Some(sync(1)));

        subscription.close().await;
        assert_eq!(registry.listener_count("r1").await, 0);
    }

    #[tokio::test]
    async fn dropped_subscription_unsubscribes() {
        let registry = Arc::new(RoomRegistry::new());
        let subscription = registry.listen("r1", 8).await;
        assert_eq!(registry.listener_count("r1").await, 1);

        drop(subscription);

        for _ in 0..50 {
            if registry.listener_count("r1").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.listener_count("r1").await, 0);
    }

    #[tokio::test]
    async fn slow_subscription_is_dropped() {
        let registry = Arc::new(RoomRegistry::new());
        let _slow = registry.listen("r1", 1).await;
        let fast = FakeSink::default();
        registry.subscribe("r1", Box::new(fast.clone())).await;

        registry.publish("r1", &sync(1)).await;
        let delivered = registry.publish("r1", &sync(2)).await;

        assert_eq!(delivered, 1);
        assert_eq!(fast.received(), vec![sync(1), sync(2)]);
    }
}
