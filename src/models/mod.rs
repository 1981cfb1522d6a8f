//! Data models
//!
//! Database entities plus the expanded views returned by the API.

mod chat;
mod notification;
mod post;
mod reset_token;
mod session;
mod user;

pub use chat::{preview_text, ChatMessage, ChatRoom, RoomPreview, LIKE_MESSAGE};
pub use notification::{Notification, NotificationKind, NotificationView};
pub use post::{CommentAuthor, CommentView, Post, PostView};
pub use reset_token::{ResetToken, ResetTokenStatus};
pub use session::Session;
pub use user::{CreateUserInput, Profile, Suggestion, UpdateProfileInput, User, UserSummary};
