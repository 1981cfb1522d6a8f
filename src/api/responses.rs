//! Shared API response types
//!
//! Success bodies keep the `{success: true, ...}` envelope clients expect.

use serde::{Deserialize, Serialize};

use crate::models::{ChatRoom, Profile};

/// `{success: true, message}`
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessMessage {
    pub success: bool,
    pub message: String,
}

impl SuccessMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Bare `{success: true}`
#[derive(Debug, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Whether unread notifications exist
#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadResponse {
    pub notifications: bool,
}

/// Result of marking notifications read
#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub success: bool,
    pub updated: u64,
}

/// Profile after an update
#[derive(Debug, Serialize)]
pub struct ProfileUpdatedResponse {
    pub success: bool,
    pub user: Profile,
}

/// A room as `{id, people}`
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: String,
    pub people: Vec<i64>,
}

impl From<ChatRoom> for RoomResponse {
    fn from(room: ChatRoom) -> Self {
        Self {
            id: room.id,
            people: room.people,
        }
    }
}
