//! Notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserSummary;

/// What a notification is about. Stored and serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn code(self) -> i32 {
        match self {
            NotificationKind::Like => 1,
            NotificationKind::Comment => 2,
            NotificationKind::Follow => 3,
        }
    }
}

impl From<NotificationKind> for i32 {
    fn from(kind: NotificationKind) -> Self {
        kind.code()
    }
}

impl TryFrom<i32> for NotificationKind {
    type Error = anyhow::Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(NotificationKind::Like),
            2 => Ok(NotificationKind::Comment),
            3 => Ok(NotificationKind::Follow),
            _ => Err(anyhow::anyhow!("Invalid notification type: {}", code)),
        }
    }
}

/// One entry of a user's notification log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    /// Recipient
    pub user_id: i64,
    /// The user whose action produced the notification
    pub source_user_id: i64,
    pub content: String,
    pub notification_type: NotificationKind,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: i64,
        source_user_id: i64,
        kind: NotificationKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            source_user_id,
            content: content.into(),
            notification_type: kind,
            seen: false,
            created_at: Utc::now(),
        }
    }
}

/// Notification as returned to its recipient, with the source user resolved
#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub id: i64,
    pub user: UserSummary,
    pub content: String,
    pub notification_type: NotificationKind,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}
