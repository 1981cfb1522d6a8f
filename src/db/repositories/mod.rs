//! Database repositories
//!
//! One repository per aggregate. Each exposes an `#[async_trait]` trait and a
//! `Sqlx*Repository` that dispatches on the configured driver.

pub mod chat;
pub mod follow;
pub mod notification;
pub mod post;
pub mod reset_token;
pub mod session;
pub mod user;

pub use chat::{ChatRepository, SqlxChatRepository};
pub use follow::{FollowRepository, FollowToggle, SqlxFollowRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use reset_token::{ResetTokenRepository, SqlxResetTokenRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
