//! Social graph service
//!
//! Follow edges, follow suggestions and the notification log they feed.

use crate::db::repositories::{
    FollowRepository, FollowToggle, NotificationRepository, UserRepository,
};
use crate::models::{Notification, NotificationKind, NotificationView, Suggestion, User};
use anyhow::Context;
use std::sync::Arc;

/// Content of the notification a new follower produces
pub const FOLLOW_NOTIFICATION: &str = "Followed you";

/// Suggestions returned when the client gives no limit
pub const DEFAULT_SUGGESTIONS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SocialServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SocialService {
    user_repo: Arc<dyn UserRepository>,
    follow_repo: Arc<dyn FollowRepository>,
    notification_repo: Arc<dyn NotificationRepository>,
}

impl SocialService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        follow_repo: Arc<dyn FollowRepository>,
        notification_repo: Arc<dyn NotificationRepository>,
    ) -> Self {
        Self {
            user_repo,
            follow_repo,
            notification_repo,
        }
    }

    /// Follow `target_id`, or unfollow it if already followed.
    ///
    /// A new follow notifies the target.
    pub async fn toggle_follow(
        &self,
        follower_id: i64,
        target_id: i64,
    ) -> Result<FollowToggle, SocialServiceError> {
        if follower_id == target_id {
            return Err(SocialServiceError::ValidationError(
                "You cannot follow yourself".to_string(),
            ));
        }
        self.require_user(target_id).await?;

        let notification = Notification::new(
            target_id,
            follower_id,
            NotificationKind::Follow,
            FOLLOW_NOTIFICATION,
        );
        let outcome = self
            .follow_repo
            .toggle(follower_id, target_id, &notification)
            .await
            .context("Failed to toggle follow")?;

        tracing::debug!(follower_id, target_id, ?outcome, "Follow toggled");
        Ok(outcome)
    }

    /// Users following `user_id`, as full user documents
    pub async fn followers(&self, user_id: i64) -> Result<Vec<User>, SocialServiceError> {
        self.require_user(user_id).await?;
        Ok(self
            .follow_repo
            .followers(user_id)
            .await
            .context("Failed to load followers")?)
    }

    pub async fn followings(&self, user_id: i64) -> Result<Vec<User>, SocialServiceError> {
        self.require_user(user_id).await?;
        Ok(self
            .follow_repo
            .followings(user_id)
            .await
            .context("Failed to load followings")?)
    }

    /// Up to `limit` users not yet followed by `user_id`, most followed first
    pub async fn suggestions(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Suggestion>, SocialServiceError> {
        if limit < 0 {
            return Err(SocialServiceError::ValidationError(
                "limit must be a non-negative integer".to_string(),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .follow_repo
            .suggestions(user_id, limit)
            .await
            .context("Failed to load suggestions")?)
    }

    pub async fn has_unread(&self, user_id: i64) -> Result<bool, SocialServiceError> {
        Ok(self.notification_repo.has_unread(user_id).await?)
    }

    /// The whole log, newest first
    pub async fn notifications(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationView>, SocialServiceError> {
        Ok(self
            .notification_repo
            .list_for(user_id)
            .await
            .context("Failed to load notifications")?)
    }

    /// Mark every notification seen; returns how many changed
    pub async fn mark_read(&self, user_id: i64) -> Result<u64, SocialServiceError> {
        Ok(self
            .notification_repo
            .mark_all_read(user_id)
            .await
            .context("Failed to mark notifications read")?)
    }

    async fn require_user(&self, user_id: i64) -> Result<User, SocialServiceError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .ok_or_else(|| SocialServiceError::NotFound("No user found".to_string()))
    }
}
