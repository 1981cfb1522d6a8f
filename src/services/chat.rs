//! Chat rooms and live messages

use crate::db::repositories::{ChatRepository, UserRepository};
use crate::models::{preview_text, ChatMessage, ChatRoom, RoomPreview};
use crate::services::realtime::RoomBroadcast;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum ChatServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("You are not a member of this room")]
    Forbidden,

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct ChatService {
    chat_repo: Arc<dyn ChatRepository>,
    user_repo: Arc<dyn UserRepository>,
    hub: Arc<RoomBroadcast>,
}

impl ChatService {
    pub fn new(
        chat_repo: Arc<dyn ChatRepository>,
        user_repo: Arc<dyn UserRepository>,
        hub: Arc<RoomBroadcast>,
    ) -> Self {
        Self {
            chat_repo,
            user_repo,
            hub,
        }
    }

    /// The two-person room of `user_id` and `other_id`, created on first use
    pub async fn open_direct_room(
        &self,
        user_id: i64,
        other_id: i64,
    ) -> Result<ChatRoom, ChatServiceError> {
        if user_id == other_id {
            return Err(ChatServiceError::ValidationError(
                "Cannot open a chat with yourself".to_string(),
            ));
        }
        if self
            .user_repo
            .get_by_id(other_id)
            .await
            .context("Failed to get chat partner")?
            .is_none()
        {
            return Err(ChatServiceError::NotFound("No user found".to_string()));
        }

        if let Some(room) = self
            .chat_repo
            .find_direct_room(user_id, other_id)
            .await
            .context("Failed to find direct room")?
        {
            return Ok(room);
        }

        let room = self
            .chat_repo
            .create_room(&[user_id, other_id])
            .await
            .context("Failed to create chat room")?;
        tracing::debug!(room_id = %room.id, "Created chat room");
        Ok(room)
    }

    /// A room the user belongs to
    pub async fn get_room(&self, user_id: i64, room_id: &str) -> Result<ChatRoom, ChatServiceError> {
        let room = self
            .chat_repo
            .get_room(room_id)
            .await
            .context("Failed to get chat room")?
            .ok_or_else(|| ChatServiceError::NotFound("Room not found".to_string()))?;

        if !room.is_member(user_id) {
            return Err(ChatServiceError::Forbidden);
        }
        Ok(room)
    }

    /// Previews of every room of `user_id`, most recently active first
    pub async fn rooms(&self, user_id: i64) -> Result<Vec<RoomPreview>, ChatServiceError> {
        let rooms = self
            .chat_repo
            .rooms_for(user_id)
            .await
            .context("Failed to list chat rooms")?;

        let mut previews = Vec::with_capacity(rooms.len());
        for room in rooms {
            previews.push(self.build_preview(user_id, room).await?);
        }
        Ok(previews)
    }

    pub async fn preview(
        &self,
        user_id: i64,
        room_id: &str,
    ) -> Result<RoomPreview, ChatServiceError> {
        let room = self.get_room(user_id, room_id).await?;
        self.build_preview(user_id, room).await
    }

    /// Store a message and push it to the room's live subscribers
    pub async fn post_message(
        &self,
        user_id: i64,
        room_id: &str,
        message: &str,
    ) -> Result<ChatMessage, ChatServiceError> {
        if message.trim().is_empty() {
            return Err(ChatServiceError::ValidationError(
                "Message cannot be empty".to_string(),
            ));
        }
        let room = self.get_room(user_id, room_id).await?;

        let stored = self
            .chat_repo
            .add_message(&room.id, user_id, message)
            .await
            .context("Failed to store chat message")?;

        let delivered = self.hub.publish(stored.clone()).await;
        tracing::debug!(room_id = %room.id, delivered, "Chat message published");
        Ok(stored)
    }

    pub async fn latest(
        &self,
        user_id: i64,
        room_id: &str,
    ) -> Result<Option<ChatMessage>, ChatServiceError> {
        let room = self.get_room(user_id, room_id).await?;
        Ok(self
            .chat_repo
            .latest_message(&room.id)
            .await
            .context("Failed to get latest message")?)
    }

    /// Join a room's live feed.
    ///
    /// Returns the latest stored message alongside the receiver. The caller
    /// must hand the room back with [`ChatService::unsubscribe`] after
    /// dropping the receiver.
    pub async fn subscribe(
        &self,
        user_id: i64,
        room_id: &str,
    ) -> Result<(Option<ChatMessage>, broadcast::Receiver<ChatMessage>), ChatServiceError> {
        let room = self.get_room(user_id, room_id).await?;
        // Subscribe first so nothing published after the lookup is missed
        let rx = self.hub.subscribe(&room.id).await;
        match self.chat_repo.latest_message(&room.id).await {
            Ok(latest) => Ok((latest, rx)),
            Err(e) => {
                drop(rx);
                self.hub.release(&room.id).await;
                Err(e.context("Failed to get latest message").into())
            }
        }
    }

    pub async fn unsubscribe(&self, room_id: &str) {
        self.hub.release(room_id).await;
        let active_rooms = self.hub.active_rooms().await;
        tracing::debug!(room_id, active_rooms, "Chat subscriber left");
    }

    /// Rooms that currently have a live channel
    pub async fn live_rooms(&self) -> usize {
        self.hub.active_rooms().await
    }

    async fn build_preview(
        &self,
        user_id: i64,
        room: ChatRoom,
    ) -> Result<RoomPreview, ChatServiceError> {
        let counterpart = match room.counterpart_of(user_id) {
            Some(id) => self
                .user_repo
                .get_by_id(id)
                .await
                .context("Failed to get chat counterpart")?,
            None => None,
        };
        let latest = self
            .chat_repo
            .latest_message(&room.id)
            .await
            .context("Failed to get latest message")?;

        Ok(RoomPreview {
            id: room.id,
            people: room.people,
            name: counterpart.as_ref().map(|u| u.name.clone()).unwrap_or_default(),
            avatar: counterpart.and_then(|u| u.avatar),
            last_message: latest.as_ref().map(|m| preview_text(&m.message)),
            last_message_at: latest.map(|m| m.created_at),
        })
    }
}
