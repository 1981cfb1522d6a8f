//! User repository
//!
//! Account and profile rows. Follow-graph queries live in
//! [`super::follow`].

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, name, bio, avatar, created_at, updated_at";

/// `USER_COLUMNS` qualified with the `u` alias, for joins
pub(super) const USER_COLUMNS_U: &str =
    "u.id, u.username, u.email, u.password_hash, u.name, u.bio, u.avatar, u.created_at, u.updated_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Match `text` against emails (case-insensitive), then usernames
    async fn find_by_username_or_email(&self, text: &str) -> Result<Option<User>> {
        let text = text.trim();
        if let Some(user) = self.get_by_email(&text.to_lowercase()).await? {
            return Ok(Some(user));
        }
        self.get_by_username(text).await
    }

    /// Persist `name`, `bio` and `avatar`; returns `None` if the row is gone
    async fn update_profile(&self, user: &User) -> Result<Option<User>>;

    /// Replace the password hash; returns whether a row was updated
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool>;

    /// Substring match on username, excluding one user.
    ///
    /// Case folding is ASCII only, matching SQLite's `LOWER`.
    async fn search(&self, text: &str, exclude_id: i64) -> Result<Vec<User>>;

    /// Every user except `exclude_id`, ordered by id
    async fn list_except(&self, exclude_id: i64) -> Result<Vec<User>>;
}

/// SQLx-based user repository for SQLite and MySQL
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite()?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql()?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(username)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by username")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(username)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by username")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn update_profile(&self, user: &User) -> Result<Option<User>> {
        let now = Utc::now();
        let sql = "UPDATE users SET name = ?, bio = ?, avatar = ?, updated_at = ? WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&user.name)
                .bind(&user.bio)
                .bind(&user.avatar)
                .bind(now)
                .bind(user.id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to update profile")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&user.name)
                .bind(&user.bio)
                .bind(&user.avatar)
                .bind(now)
                .bind(user.id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to update profile")?
                .rows_affected(),
        };

        if affected == 0 {
            // MySQL reports 0 for an unchanged row, so confirm it still exists
            return self.get_by_id(user.id).await;
        }
        Ok(Some(User {
            updated_at: now,
            ..user.clone()
        }))
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let now = Utc::now();
        let sql = "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(password_hash)
                .bind(now)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to update password")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(password_hash)
                .bind(now)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to update password")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn search(&self, text: &str, exclude_id: i64) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(&text.to_ascii_lowercase()));
        let sql = format!(
            "SELECT {} FROM users WHERE LOWER(username) LIKE ? ESCAPE '!' AND id <> ? ORDER BY id",
            USER_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(&pattern)
                    .bind(exclude_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to search users")?;
                rows.iter().map(row_to_user_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(&pattern)
                    .bind(exclude_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to search users")?;
                rows.iter().map(row_to_user_mysql).collect()
            }
        }
    }

    async fn list_except(&self, exclude_id: i64) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users WHERE id <> ? ORDER BY id", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(exclude_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list users")?;
                rows.iter().map(row_to_user_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(exclude_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list users")?;
                rows.iter().map(row_to_user_mysql).collect()
            }
        }
    }
}

/// Escape LIKE wildcards using `!` as the escape character
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '!' | '%' | '_') {
            escaped.push('!');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, name, bio, avatar, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.name)
    .bind(&user.bio)
    .bind(&user.avatar)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

pub(super) fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        avatar: row.try_get("avatar")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, name, bio, avatar, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.name)
    .bind(&user.bio)
    .bind(&user.avatar)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

pub(super) fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        avatar: row.try_get("avatar")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
