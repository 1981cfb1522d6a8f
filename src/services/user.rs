//! User service
//!
//! Accounts, sessions and profiles:
//! - registration and login (argon2 hashes, opaque session tokens)
//! - profile lookup with followers, followings and posts expanded
//! - profile update and password change
//! - user search and listing

use crate::db::repositories::{FollowRepository, PostRepository, SessionRepository, UserRepository};
use crate::models::{CreateUserInput, Profile, Session, UpdateProfileInput, User};
use crate::services::password::{hash_password, verify_password};
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;

/// Default session lifetime in days
const DEFAULT_SESSION_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    AuthenticationError(String),

    #[error("{0}")]
    UserExists(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl UserServiceError {
    fn no_user() -> Self {
        Self::NotFound("No user found".to_string())
    }
}

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    /// Username or email address
    pub username_or_email: String,
    pub password: String,
}

/// Input for changing the password of a signed-in user
#[derive(Debug, Clone)]
pub struct ChangePasswordInput {
    /// Current password
    pub password: String,
    pub new_password: String,
    pub confirm_password: String,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    follow_repo: Arc<dyn FollowRepository>,
    post_repo: Arc<dyn PostRepository>,
    session_lifetime: Duration,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        follow_repo: Arc<dyn FollowRepository>,
        post_repo: Arc<dyn PostRepository>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            follow_repo,
            post_repo,
            session_lifetime: Duration::days(DEFAULT_SESSION_DAYS),
        }
    }

    pub fn with_session_days(mut self, days: i64) -> Self {
        self.session_lifetime = Duration::days(days.max(1));
        self
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for an empty or malformed username, email or password
    /// - `UserExists` if the username or email is taken
    pub async fn register(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        let input = CreateUserInput {
            username: input.username.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            password: input.password,
        };
        validate_register_input(&input)?;

        if self
            .user_repo
            .get_by_username(&input.username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                input.username
            )));
        }

        if self
            .user_repo
            .get_by_email(&input.email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                input.email
            )));
        }

        let password_hash = hash_password(&input.password)?;
        let user = self
            .user_repo
            .create(&User::new(input.username, input.email, password_hash))
            .await
            .context("Failed to create user")?;

        tracing::info!(user_id = user.id, "Registered user {}", user.username);
        Ok(user)
    }

    /// Check credentials and open a session.
    ///
    /// Unknown user and wrong password produce the same error.
    pub async fn login(&self, input: LoginInput) -> Result<(User, Session), UserServiceError> {
        let invalid =
            || UserServiceError::AuthenticationError("Invalid username or password".to_string());

        let user = self
            .user_repo
            .find_by_username_or_email(&input.username_or_email)
            .await
            .context("Failed to look up user")?
            .ok_or_else(invalid)?;

        if !verify_password(&input.password, &user.password_hash)? {
            tracing::debug!(user_id = user.id, "Rejected login with wrong password");
            return Err(invalid());
        }

        let session = self
            .session_repo
            .create(&Session::issue(user.id, self.session_lifetime))
            .await
            .context("Failed to create session")?;

        Ok((user, session))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Missing or expired sessions yield `None`; an expired session is
    /// deleted on the way out.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.session_repo.delete(token).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get session user")?;
        Ok(user)
    }

    /// Remove expired sessions; returns how many were deleted
    pub async fn purge_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self.session_repo.delete_expired().await?)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?
            .ok_or_else(UserServiceError::no_user)
    }

    /// Profile of `username` with relations and posts expanded
    pub async fn get_profile(&self, username: &str) -> Result<Profile, UserServiceError> {
        let user = self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?
            .ok_or_else(UserServiceError::no_user)?;
        self.expand(user).await
    }

    /// Overwrite name and bio, and the avatar when a new one was uploaded
    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<Profile, UserServiceError> {
        let mut user = self.get_by_id(user_id).await?;

        user.name = input.name;
        user.bio = input.bio;
        if input.avatar.is_some() {
            user.avatar = input.avatar;
        }

        let updated = self
            .user_repo
            .update_profile(&user)
            .await
            .context("Failed to update profile")?
            .ok_or_else(UserServiceError::no_user)?;
        self.expand(updated).await
    }

    /// Change the password after checking the current one.
    ///
    /// Nothing is written unless every check passes.
    pub async fn change_password(
        &self,
        user_id: i64,
        input: ChangePasswordInput,
    ) -> Result<(), UserServiceError> {
        let user = self.get_by_id(user_id).await?;

        if !verify_password(&input.password, &user.password_hash)? {
            return Err(UserServiceError::ValidationError(
                "Current password is wrong".to_string(),
            ));
        }
        if input.new_password != input.confirm_password {
            return Err(UserServiceError::ValidationError(
                "Passwords do not match".to_string(),
            ));
        }
        if input.new_password.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Password cannot be empty".to_string(),
            ));
        }

        let hash = hash_password(&input.new_password)?;
        if !self
            .user_repo
            .update_password(user_id, &hash)
            .await
            .context("Failed to update password")?
        {
            return Err(UserServiceError::no_user());
        }
        Ok(())
    }

    /// Users whose username contains `text`, ignoring case, except `user_id`
    pub async fn search(&self, user_id: i64, text: &str) -> Result<Vec<User>, UserServiceError> {
        Ok(self
            .user_repo
            .search(text.trim(), user_id)
            .await
            .context("Failed to search users")?)
    }

    /// Every user except `user_id`
    pub async fn list_all(&self, user_id: i64) -> Result<Vec<User>, UserServiceError> {
        Ok(self
            .user_repo
            .list_except(user_id)
            .await
            .context("Failed to list users")?)
    }

    async fn expand(&self, user: User) -> Result<Profile, UserServiceError> {
        let followers = self
            .follow_repo
            .followers(user.id)
            .await?
            .iter()
            .map(User::summary)
            .collect();
        let followings = self
            .follow_repo
            .followings(user.id)
            .await?
            .iter()
            .map(User::summary)
            .collect();
        let posts = self
            .post_repo
            .list_expanded_by_user(user.id)
            .await
            .context("Failed to load posts")?;

        Ok(Profile::new(user, followers, followings, posts))
    }
}

fn validate_register_input(input: &CreateUserInput) -> Result<(), UserServiceError> {
    if input.username.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Username cannot be empty".to_string(),
        ));
    }
    if input.username.chars().count() > 50
        || !input
            .username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(UserServiceError::ValidationError(
            "Username may only contain ASCII letters, digits, '_', '-' and '.' (max 50)".to_string(),
        ));
    }
    if input.email.is_empty() || !input.email.contains('@') {
        return Err(UserServiceError::ValidationError(
            "Invalid email format".to_string(),
        ));
    }
    if input.password.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Password cannot be empty".to_string(),
        ));
    }
    Ok(())
}
