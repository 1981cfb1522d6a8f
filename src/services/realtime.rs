//! Per-room broadcast channels for live chat messages

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::models::ChatMessage;

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out of new messages to the WebSocket subscribers of each room.
///
/// A room's channel exists only while someone is subscribed.
pub struct RoomBroadcast {
    channels: RwLock<HashMap<String, broadcast::Sender<ChatMessage>>>,
}

impl RoomBroadcast {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a room, creating its channel on first subscribe
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<ChatMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to a room's subscribers; returns how many received it.
    ///
    /// A channel whose receivers are all gone is dropped here.
    pub async fn publish(&self, message: ChatMessage) -> usize {
        let room_id = message.room_id.clone();
        let sent = {
            let channels = self.channels.read().await;
            match channels.get(&room_id) {
                Some(sender) => sender.send(message).ok(),
                None => return 0,
            }
        };
        match sent {
            Some(count) => count,
            None => {
                self.release(&room_id).await;
                0
            }
        }
    }

    /// Drop a room's channel once its last subscriber has gone
    pub async fn release(&self, room_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(room_id) {
            if sender.receiver_count() == 0 {
                channels.remove(room_id);
            }
        }
    }

    pub async fn active_rooms(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for RoomBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(room_id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            room_id: room_id.to_string(),
            sender_id: 1,
            message: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_messages() {
        let hub = RoomBroadcast::new();
        let mut rx1 = hub.subscribe("room").await;
        let mut rx2 = hub.subscribe("room").await;

        assert_eq!(hub.publish(message("room", "hello")).await, 2);

        assert_eq!(rx1.recv().await.unwrap().message, "hello");
        assert_eq!(rx2.recv().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = RoomBroadcast::new();
        let mut a = hub.subscribe("a").await;
        let _b = hub.subscribe("b").await;

        hub.publish(message("b", "for b")).await;
        hub.publish(message("a", "for a")).await;

        assert_eq!(a.recv().await.unwrap().message, "for a");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = RoomBroadcast::new();
        assert_eq!(hub.publish(message("empty", "nobody")).await, 0);
        assert_eq!(hub.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_publish_prunes_abandoned_room() {
        let hub = RoomBroadcast::new();
        let rx = hub.subscribe("room").await;
        drop(rx);
        assert_eq!(hub.active_rooms().await, 1);

        assert_eq!(hub.publish(message("room", "anyone?")).await, 0);
        assert_eq!(hub.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_release_only_when_unused() {
        let hub = RoomBroadcast::new();
        let rx = hub.subscribe("room").await;

        hub.release("room").await;
        assert_eq!(hub.active_rooms().await, 1);

        drop(rx);
        hub.release("room").await;
        assert_eq!(hub.active_rooms().await, 0);
    }
}
