//! Chat room models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message body clients send to express a "like" in a room
pub const LIKE_MESSAGE: &str = "like_true";

/// Previews longer than this many characters are cut
const PREVIEW_MAX_CHARS: usize = 27;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: String,
    /// Member ids in join order
    pub people: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn is_member(&self, user_id: i64) -> bool {
        self.people.contains(&user_id)
    }

    /// The first member that is not `user_id`
    pub fn counterpart_of(&self, user_id: i64) -> Option<i64> {
        self.people.iter().copied().find(|id| *id != user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: String,
    pub sender_id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// What a room list entry shows: who the conversation is with and the
/// latest message in short form
#[derive(Debug, Clone, Serialize)]
pub struct RoomPreview {
    pub id: String,
    pub people: Vec<i64>,
    /// Counterpart display name, empty for a room with no other member
    pub name: String,
    pub avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Short form of a message for room lists.
///
/// Likes render as `like`, anything carrying a link as `image`, and long
/// text is cut to its first 27 characters followed by `"  ..."`.
pub fn preview_text(message: &str) -> String {
    if message == LIKE_MESSAGE {
        return "like".to_string();
    }
    if message.contains("http") {
        return "image".to_string();
    }
    if message.chars().count() > PREVIEW_MAX_CHARS {
        let head: String = message.chars().take(PREVIEW_MAX_CHARS).collect();
        return format!("{}  ...", head);
    }
    message.to_string()
}
