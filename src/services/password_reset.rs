//! Password reset by emailed link

use crate::db::repositories::{ResetTokenRepository, UserRepository};
use crate::models::{ResetToken, ResetTokenStatus};
use crate::services::email::{Email, Mailer};
use crate::services::password::hash_password;
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PasswordResetError {
    #[error("No user found")]
    UserNotFound,

    #[error("Invalid Link")]
    InvalidLink,

    #[error("Link Expired")]
    LinkExpired,

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PasswordResetService {
    user_repo: Arc<dyn UserRepository>,
    token_repo: Arc<dyn ResetTokenRepository>,
    mailer: Arc<dyn Mailer>,
    client_url: String,
    ttl: Duration,
}

impl PasswordResetService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        token_repo: Arc<dyn ResetTokenRepository>,
        mailer: Arc<dyn Mailer>,
        client_url: impl Into<String>,
        ttl_hours: i64,
    ) -> Self {
        Self {
            user_repo,
            token_repo,
            mailer,
            client_url: client_url.into().trim_end_matches('/').to_string(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Link the client opens to choose a new password
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset/{}", self.client_url, token)
    }

    /// Issue a token for the account matching `text` (email or username) and
    /// mail the link to it. A repeated request replaces the previous token.
    pub async fn request_reset(&self, text: &str) -> Result<(), PasswordResetError> {
        let user = self
            .user_repo
            .find_by_username_or_email(text)
            .await
            .context("Failed to look up user")?
            .ok_or(PasswordResetError::UserNotFound)?;

        let token = ResetToken::issue(user.email.clone());
        self.token_repo
            .upsert(&token)
            .await
            .context("Failed to store reset token")?;

        self.mailer
            .send(Email {
                to: user.email.clone(),
                subject: "Reset your password".to_string(),
                body: format!(
                    "Hi {},\n\nOpen this link to choose a new password:\n{}\n\n\
                     The link is valid for {} hours.\n",
                    user.name,
                    self.reset_link(&token.token),
                    self.ttl.num_hours()
                ),
            })
            .await
            .context("Failed to send reset email")?;

        tracing::info!(user_id = user.id, "Password reset link issued");
        Ok(())
    }

    pub async fn check(&self, token: &str) -> Result<ResetTokenStatus, PasswordResetError> {
        let found = self
            .token_repo
            .find(token)
            .await
            .context("Failed to find reset token")?;

        Ok(match found {
            None => ResetTokenStatus::Invalid,
            Some(t) if t.is_expired_at(Utc::now(), self.ttl) => ResetTokenStatus::Expired,
            Some(_) => ResetTokenStatus::Valid,
        })
    }

    /// Set a new password with a valid token and consume the token
    pub async fn reset(&self, token: &str, password: &str) -> Result<(), PasswordResetError> {
        match self.check(token).await? {
            ResetTokenStatus::Invalid => return Err(PasswordResetError::InvalidLink),
            ResetTokenStatus::Expired => return Err(PasswordResetError::LinkExpired),
            ResetTokenStatus::Valid => {}
        }
        if password.is_empty() {
            return Err(PasswordResetError::ValidationError(
                "Password cannot be empty".to_string(),
            ));
        }

        let hash = hash_password(password)?;
        // The token may have been consumed between check and here
        if !self
            .token_repo
            .consume(token, &hash)
            .await
            .context("Failed to consume reset token")?
        {
            return Err(PasswordResetError::InvalidLink);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::tests::{seed_user, setup_pool};
    use crate::db::repositories::{SqlxResetTokenRepository, SqlxUserRepository};
    use crate::db::DynDatabasePool;
    use crate::services::email::RecordingMailer;
    use crate::services::password::verify_password;

    async fn setup() -> (DynDatabasePool, Arc<RecordingMailer>, PasswordResetService) {
        let pool = setup_pool().await;
        let mailer = Arc::new(RecordingMailer::default());
        let service = PasswordResetService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxResetTokenRepository::boxed(pool.clone()),
            mailer.clone(),
            "http://client.test/",
            24,
        );
        (pool, mailer, service)
    }

    fn token_from(mailer: &RecordingMailer) -> String {
        let sent = mailer.sent.lock().unwrap();
        let body = &sent.last().unwrap().body;
        let start = body.find("/reset/").unwrap() + "/reset/".len();
        body[start..].split_whitespace().next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_request_mails_link_by_username_or_email() {
        let (pool, mailer, service) = setup().await;
        seed_user(&pool, "ana").await;

        service.request_reset("ana").await.unwrap();
        service.request_reset("ANA@example.com").await.unwrap();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "ana@example.com");
        assert!(sent[0].body.contains("http://client.test/reset/"));
    }

    #[tokio::test]
    async fn test_request_unknown_user() {
        let (_pool, mailer, service) = setup().await;
        let result = service.request_reset("ghost").await;
        assert!(matches!(result, Err(PasswordResetError::UserNotFound)));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_request_invalidates_first_link() {
        let (pool, mailer, service) = setup().await;
        seed_user(&pool, "ana").await;

        service.request_reset("ana").await.unwrap();
        let first = token_from(&mailer);
        service.request_reset("ana").await.unwrap();
        let second = token_from(&mailer);

        assert_ne!(first, second);
        assert_eq!(service.check(&first).await.unwrap(), ResetTokenStatus::Invalid);
        assert_eq!(service.check(&second).await.unwrap(), ResetTokenStatus::Valid);
    }

    #[tokio::test]
    async fn test_reset_consumes_token() {
        let (pool, mailer, service) = setup().await;
        let ana = seed_user(&pool, "ana").await;
        service.request_reset("ana").await.unwrap();
        let token = token_from(&mailer);

        let empty = service.reset(&token, "").await;
        assert!(matches!(empty, Err(PasswordResetError::ValidationError(_))));

        service.reset(&token, "fresh").await.unwrap();
        let stored = SqlxUserRepository::new(pool)
            .get_by_id(ana.id)
            .await
            .unwrap()
            .unwrap();
        assert!(verify_password("fresh", &stored.password_hash).unwrap());

        assert_eq!(service.check(&token).await.unwrap(), ResetTokenStatus::Invalid);
        assert!(matches!(
            service.reset(&token, "again").await,
            Err(PasswordResetError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_cannot_be_used() {
        let (pool, _mailer, service) = setup().await;
        seed_user(&pool, "ana").await;
        let stale = ResetToken {
            token: "stale".to_string(),
            email: "ana@example.com".to_string(),
            updated_at: Utc::now() - Duration::hours(24),
        };
        SqlxResetTokenRepository::new(pool).upsert(&stale).await.unwrap();

        assert_eq!(service.check("stale").await.unwrap(), ResetTokenStatus::Expired);
        assert!(matches!(
            service.reset("stale", "pw").await,
            Err(PasswordResetError::LinkExpired)
        ));
    }
}
