//! Password reset token repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::ResetToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    /// Store `token`, replacing the token and issue time of an existing row
    /// for the same email
    async fn upsert(&self, token: &ResetToken) -> Result<()>;

    async fn find(&self, token: &str) -> Result<Option<ResetToken>>;

    /// Set the password hash of the account owning `token` and delete the
    /// token, atomically. Returns `false` if the token no longer exists.
    async fn consume(&self, token: &str, password_hash: &str) -> Result<bool>;
}

pub struct SqlxResetTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxResetTokenRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ResetTokenRepository> {
        Arc::new(Self::new(pool))
    }
}

const UPSERT_SQLITE: &str = r#"
    INSERT INTO reset_tokens (token, email, updated_at) VALUES (?, ?, ?)
    ON CONFLICT(email) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at
"#;
const UPSERT_MYSQL: &str = r#"
    INSERT INTO reset_tokens (token, email, updated_at) VALUES (?, ?, ?)
    ON DUPLICATE KEY UPDATE token = VALUES(token), updated_at = VALUES(updated_at)
"#;
const FIND_SQL: &str = "SELECT token, email, updated_at FROM reset_tokens WHERE token = ?";
const UPDATE_PASSWORD_SQL: &str =
    "UPDATE users SET password_hash = ?, updated_at = ? WHERE email = ?";
const DELETE_SQL: &str = "DELETE FROM reset_tokens WHERE token = ?";

#[async_trait]
impl ResetTokenRepository for SqlxResetTokenRepository {
    async fn upsert(&self, token: &ResetToken) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(UPSERT_SQLITE)
                    .bind(&token.token)
                    .bind(&token.email)
                    .bind(token.updated_at)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to store reset token")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(UPSERT_MYSQL)
                    .bind(&token.token)
                    .bind(&token.email)
                    .bind(token.updated_at)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to store reset token")?;
            }
        }
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<ResetToken>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(FIND_SQL)
                    .bind(token)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to find reset token")?;
                row.as_ref().map(row_to_token_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(FIND_SQL)
                    .bind(token)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to find reset token")?;
                row.as_ref().map(row_to_token_mysql).transpose()
            }
        }
    }

    async fn consume(&self, token: &str, password_hash: &str) -> Result<bool> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self.pool.sqlite()?.begin().await?;
                let row = sqlx::query(FIND_SQL)
                    .bind(token)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to find reset token")?;
                let Some(row) = row else {
                    return Ok(false);
                };
                let email: String = row.try_get("email")?;

                sqlx::query(UPDATE_PASSWORD_SQL)
                    .bind(password_hash)
                    .bind(now)
                    .bind(&email)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update password")?;
                sqlx::query(DELETE_SQL)
                    .bind(token)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to delete reset token")?;

                tx.commit().await.context("Failed to commit password reset")?;
                Ok(true)
            }
            DatabaseDriver::Mysql => {
                let mut tx = self.pool.mysql()?.begin().await?;
                let row = sqlx::query(
                    "SELECT token, email, updated_at FROM reset_tokens WHERE token = ? FOR UPDATE",
                )
                .bind(token)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to find reset token")?;
                let Some(row) = row else {
                    return Ok(false);
                };
                let email: String = row.try_get("email")?;

                sqlx::query(UPDATE_PASSWORD_SQL)
                    .bind(password_hash)
                    .bind(now)
                    .bind(&email)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update password")?;
                sqlx::query(DELETE_SQL)
                    .bind(token)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to delete reset token")?;

                tx.commit().await.context("Failed to commit password reset")?;
                Ok(true)
            }
        }
    }
}

fn row_to_token_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<ResetToken> {
    Ok(ResetToken {
        token: row.try_get("token")?,
        email: row.try_get("email")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_token_mysql(row: &sqlx::mysql::MySqlRow) -> Result<ResetToken> {
    Ok(ResetToken {
        token: row.try_get("token")?,
        email: row.try_get("email")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::tests::{seed_user, setup_pool};
    use crate::db::repositories::user::{SqlxUserRepository, UserRepository};
    use chrono::Duration;

    #[tokio::test]
    async fn test_upsert_replaces_token_for_same_email() {
        let pool = setup_pool().await;
        let repo = SqlxResetTokenRepository::new(pool);

        let mut first = ResetToken::issue("ana@example.com");
        first.updated_at = Utc::now() - Duration::hours(30);
        repo.upsert(&first).await.unwrap();

        let second = ResetToken::issue("ana@example.com");
        repo.upsert(&second).await.unwrap();

        assert!(repo.find(&first.token).await.unwrap().is_none());
        let stored = repo.find(&second.token).await.unwrap().unwrap();
        assert_eq!(stored.email, "ana@example.com");
        assert!(!stored.is_expired_at(Utc::now(), Duration::hours(24)));
    }

    #[tokio::test]
    async fn test_consume_updates_password_and_deletes_token() {
        let pool = setup_pool().await;
        let ana = seed_user(&pool, "ana").await;
        let users = SqlxUserRepository::new(pool.clone());
        let repo = SqlxResetTokenRepository::new(pool);

        let token = ResetToken::issue(ana.email.clone());
        repo.upsert(&token).await.unwrap();

        assert!(repo.consume(&token.token, "fresh-hash").await.unwrap());
        assert!(repo.find(&token.token).await.unwrap().is_none());
        let stored = users.get_by_id(ana.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "fresh-hash");

        // Second use finds nothing
        assert!(!repo.consume(&token.token, "other-hash").await.unwrap());
    }
}
