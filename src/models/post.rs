//! Post read models used by profile expansion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub caption: String,
    /// Public paths of the attached files
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The author fields shown next to a comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentView {
    pub id: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub user: CommentAuthor,
}

/// A post with its likes and comments expanded
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub caption: String,
    pub files: Vec<String>,
    /// Ids of the users who liked the post
    pub likes: Vec<i64>,
    /// Comments, oldest first
    pub comments: Vec<CommentView>,
    pub created_at: DateTime<Utc>,
}
