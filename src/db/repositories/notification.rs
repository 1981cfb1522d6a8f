//! Notification repository
//!
//! Notifications are appended by the actions that produce them (see
//! [`super::follow::FollowRepository::toggle`]); this repository reads the
//! log and flips the `seen` flag.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{NotificationKind, NotificationView, UserSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Whether `user_id` has at least one unseen notification
    async fn has_unread(&self, user_id: i64) -> Result<bool>;

    /// The full log of `user_id`, newest first
    async fn list_for(&self, user_id: i64) -> Result<Vec<NotificationView>>;

    /// Mark every notification of `user_id` as seen; returns how many changed
    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;
}

pub struct SqlxNotificationRepository {
    pool: DynDatabasePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NotificationRepository> {
        Arc::new(Self::new(pool))
    }
}

const HAS_UNREAD_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM notifications WHERE user_id = ? AND seen = ?) AS unread";
const LIST_SQL: &str = r#"
    SELECT n.id, n.content, n.notification_type, n.seen, n.created_at,
           u.id AS source_id, u.username AS source_username,
           u.name AS source_name, u.avatar AS source_avatar
    FROM notifications n
    JOIN users u ON u.id = n.source_user_id
    WHERE n.user_id = ?
    ORDER BY n.id DESC
"#;
const MARK_READ_SQL: &str = "UPDATE notifications SET seen = ? WHERE user_id = ? AND seen = ?";

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn has_unread(&self, user_id: i64) -> Result<bool> {
        let unread: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(HAS_UNREAD_SQL)
                .bind(user_id)
                .bind(false)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to check unread notifications")?
                .try_get("unread")?,
            DatabaseDriver::Mysql => sqlx::query(HAS_UNREAD_SQL)
                .bind(user_id)
                .bind(false)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to check unread notifications")?
                .try_get("unread")?,
        };
        Ok(unread != 0)
    }

    async fn list_for(&self, user_id: i64) -> Result<Vec<NotificationView>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(LIST_SQL)
                    .bind(user_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list notifications")?;
                rows.iter().map(row_to_view_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(LIST_SQL)
                    .bind(user_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list notifications")?;
                rows.iter().map(row_to_view_mysql).collect()
            }
        }
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(MARK_READ_SQL)
                .bind(true)
                .bind(user_id)
                .bind(false)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to mark notifications read")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(MARK_READ_SQL)
                .bind(true)
                .bind(user_id)
                .bind(false)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to mark notifications read")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

fn row_to_view_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<NotificationView> {
    let code: i32 = row.try_get("notification_type")?;
    Ok(NotificationView {
        id: row.try_get("id")?,
        user: UserSummary {
            id: row.try_get("source_id")?,
            username: row.try_get("source_username")?,
            name: row.try_get("source_name")?,
            avatar: row.try_get("source_avatar")?,
        },
        content: row.try_get("content")?,
        notification_type: NotificationKind::try_from(code)?,
        seen: row.try_get("seen")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_view_mysql(row: &sqlx::mysql::MySqlRow) -> Result<NotificationView> {
    let code: i32 = row.try_get("notification_type")?;
    Ok(NotificationView {
        id: row.try_get("id")?,
        user: UserSummary {
            id: row.try_get("source_id")?,
            username: row.try_get("source_username")?,
            name: row.try_get("source_name")?,
            avatar: row.try_get("source_avatar")?,
        },
        content: row.try_get("content")?,
        notification_type: NotificationKind::try_from(code)?,
        seen: row.try_get("seen")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::follow::{FollowRepository, SqlxFollowRepository};
    use crate::db::repositories::user::tests::{seed_user, setup_pool};
    use crate::models::Notification;

    #[tokio::test]
    async fn test_empty_log() {
        let pool = setup_pool().await;
        let ana = seed_user(&pool, "ana").await;
        let repo = SqlxNotificationRepository::new(pool);

        assert!(!repo.has_unread(ana.id).await.unwrap());
        assert!(repo.list_for(ana.id).await.unwrap().is_empty());
        assert_eq!(repo.mark_all_read(ana.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_mark_read() {
        let pool = setup_pool().await;
        let ana = seed_user(&pool, "ana").await;
        let ben = seed_user(&pool, "ben").await;
        let cid = seed_user(&pool, "cid").await;
        let follows = SqlxFollowRepository::new(pool.clone());
        let repo = SqlxNotificationRepository::new(pool);

        for from in [&ben, &cid] {
            let notice = Notification::new(ana.id, from.id, NotificationKind::Follow, "Followed you");
            follows.toggle(from.id, ana.id, &notice).await.unwrap();
        }

        assert!(repo.has_unread(ana.id).await.unwrap());
        assert!(!repo.has_unread(ben.id).await.unwrap());

        let log = repo.list_for(ana.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].user.username, "cid");
        assert_eq!(log[1].user.username, "ben");
        assert_eq!(log[0].notification_type, NotificationKind::Follow);
        assert!(!log[0].seen);

        assert_eq!(repo.mark_all_read(ana.id).await.unwrap(), 2);
        assert!(!repo.has_unread(ana.id).await.unwrap());
        assert!(repo.list_for(ana.id).await.unwrap().iter().all(|n| n.seen));
    }
}
