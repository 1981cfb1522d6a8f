//! Services layer - Business logic
//!
//! Services own the rules; repositories own the SQL. Each service returns its
//! own `thiserror` enum which the API layer maps onto status codes.

pub mod chat;
pub mod email;
pub mod password;
pub mod password_reset;
pub mod realtime;
pub mod social;
pub mod user;

pub use chat::{ChatService, ChatServiceError};
pub use email::{mailer_from_config, Email, LogMailer, Mailer, SmtpMailer};
pub use password::{hash_password, verify_password};
pub use password_reset::{PasswordResetError, PasswordResetService};
pub use realtime::RoomBroadcast;
pub use social::{SocialService, SocialServiceError, DEFAULT_SUGGESTIONS, FOLLOW_NOTIFICATION};
pub use user::{ChangePasswordInput, LoginInput, UserService, UserServiceError};
