//! Follow graph repository
//!
//! A follow is one directed row `follower_id -> following_id`. A user's
//! followers and followings are both read from that row, so the two views
//! cannot drift apart. Relation order is the row id.

use super::user::{row_to_user_mysql, row_to_user_sqlite, USER_COLUMNS_U};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Notification, Suggestion, User, UserSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// What a toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowToggle {
    Followed,
    Unfollowed,
}

#[async_trait]
pub trait FollowRepository: Send + Sync {
    async fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool>;

    /// Remove the edge if present, otherwise insert it and append
    /// `notification` to the followed user's log. Runs in one transaction.
    async fn toggle(
        &self,
        follower_id: i64,
        following_id: i64,
        notification: &Notification,
    ) -> Result<FollowToggle>;

    /// Users following `user_id`, in relation order
    async fn followers(&self, user_id: i64) -> Result<Vec<User>>;

    /// Users `user_id` follows, in relation order
    async fn followings(&self, user_id: i64) -> Result<Vec<User>>;

    /// Users that are neither `user_id` nor followed by it, with their
    /// follower counts, most followed first
    async fn suggestions(&self, user_id: i64, limit: i64) -> Result<Vec<Suggestion>>;
}

pub struct SqlxFollowRepository {
    pool: DynDatabasePool,
}

impl SqlxFollowRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FollowRepository> {
        Arc::new(Self::new(pool))
    }
}

const EXISTS_EDGE: &str = "SELECT id FROM follows WHERE follower_id = ? AND following_id = ?";
const DELETE_EDGE: &str = "DELETE FROM follows WHERE id = ?";
const INSERT_EDGE: &str =
    "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)";
const INSERT_NOTIFICATION: &str = r#"
    INSERT INTO notifications (user_id, source_user_id, content, notification_type, seen, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;
const SUGGESTIONS: &str = r#"
    SELECT u.id, u.username, u.name, u.avatar,
           (SELECT COUNT(*) FROM follows c WHERE c.following_id = u.id) AS followers_count
    FROM users u
    WHERE u.id <> ?
      AND u.id NOT IN (SELECT f.following_id FROM follows f WHERE f.follower_id = ?)
    ORDER BY followers_count DESC, u.id ASC
    LIMIT ?
"#;

fn relation_sql(join_on: &str, filter_on: &str) -> String {
    format!(
        "SELECT {} FROM follows f JOIN users u ON u.id = f.{} WHERE f.{} = ? ORDER BY f.id",
        USER_COLUMNS_U, join_on, filter_on
    )
}

#[async_trait]
impl FollowRepository for SqlxFollowRepository {
    async fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let found = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(EXISTS_EDGE)
                .bind(follower_id)
                .bind(following_id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to check follow edge")?
                .is_some(),
            DatabaseDriver::Mysql => sqlx::query(EXISTS_EDGE)
                .bind(follower_id)
                .bind(following_id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to check follow edge")?
                .is_some(),
        };
        Ok(found)
    }

    async fn toggle(
        &self,
        follower_id: i64,
        following_id: i64,
        notification: &Notification,
    ) -> Result<FollowToggle> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self
                    .pool
                    .sqlite()?
                    .begin()
                    .await
                    .context("Failed to begin transaction")?;

                let existing = sqlx::query(EXISTS_EDGE)
                    .bind(follower_id)
                    .bind(following_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to check follow edge")?;

                let outcome = match existing {
                    Some(row) => {
                        let edge_id: i64 = row.try_get("id")?;
                        sqlx::query(DELETE_EDGE)
                            .bind(edge_id)
                            .execute(&mut *tx)
                            .await
                            .context("Failed to delete follow edge")?;
                        FollowToggle::Unfollowed
                    }
                    None => {
                        sqlx::query(INSERT_EDGE)
                            .bind(follower_id)
                            .bind(following_id)
                            .bind(Utc::now())
                            .execute(&mut *tx)
                            .await
                            .context("Failed to insert follow edge")?;
                        sqlx::query(INSERT_NOTIFICATION)
                            .bind(notification.user_id)
                            .bind(notification.source_user_id)
                            .bind(&notification.content)
                            .bind(notification.notification_type.code())
                            .bind(notification.seen)
                            .bind(notification.created_at)
                            .execute(&mut *tx)
                            .await
                            .context("Failed to append follow notification")?;
                        FollowToggle::Followed
                    }
                };

                tx.commit().await.context("Failed to commit follow toggle")?;
                Ok(outcome)
            }
            DatabaseDriver::Mysql => {
                let mut tx = self
                    .pool
                    .mysql()?
                    .begin()
                    .await
                    .context("Failed to begin transaction")?;

                // Lock the pair so concurrent toggles serialize
                let existing = sqlx::query(
                    "SELECT id FROM follows WHERE follower_id = ? AND following_id = ? FOR UPDATE",
                )
                .bind(follower_id)
                .bind(following_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to check follow edge")?;

                let outcome = match existing {
                    Some(row) => {
                        let edge_id: i64 = row.try_get("id")?;
                        sqlx::query(DELETE_EDGE)
                            .bind(edge_id)
                            .execute(&mut *tx)
                            .await
                            .context("Failed to delete follow edge")?;
                        FollowToggle::Unfollowed
                    }
                    None => {
                        sqlx::query(INSERT_EDGE)
                            .bind(follower_id)
                            .bind(following_id)
                            .bind(Utc::now())
                            .execute(&mut *tx)
                            .await
                            .context("Failed to insert follow edge")?;
                        sqlx::query(INSERT_NOTIFICATION)
                            .bind(notification.user_id)
                            .bind(notification.source_user_id)
                            .bind(&notification.content)
                            .bind(notification.notification_type.code())
                            .bind(notification.seen)
                            .bind(notification.created_at)
                            .execute(&mut *tx)
                            .await
                            .context("Failed to append follow notification")?;
                        FollowToggle::Followed
                    }
                };

                tx.commit().await.context("Failed to commit follow toggle")?;
                Ok(outcome)
            }
        }
    }

    async fn followers(&self, user_id: i64) -> Result<Vec<User>> {
        self.relation(&relation_sql("follower_id", "following_id"), user_id)
            .await
            .context("Failed to list followers")
    }

    async fn followings(&self, user_id: i64) -> Result<Vec<User>> {
        self.relation(&relation_sql("following_id", "follower_id"), user_id)
            .await
            .context("Failed to list followings")
    }

    async fn suggestions(&self, user_id: i64, limit: i64) -> Result<Vec<Suggestion>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(SUGGESTIONS)
                    .bind(user_id)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to load suggestions")?;
                rows.iter().map(row_to_suggestion_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(SUGGESTIONS)
                    .bind(user_id)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to load suggestions")?;
                rows.iter().map(row_to_suggestion_mysql).collect()
            }
        }
    }
}

impl SqlxFollowRepository {
    async fn relation(&self, sql: &str, user_id: i64) -> Result<Vec<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(sql)
                    .bind(user_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await?;
                rows.iter().map(row_to_user_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(sql)
                    .bind(user_id)
                    .fetch_all(self.pool.mysql()?)
                    .await?;
                rows.iter().map(row_to_user_mysql).collect()
            }
        }
    }
}

fn row_to_suggestion_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Suggestion> {
    Ok(Suggestion {
        user: UserSummary {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            avatar: row.try_get("avatar")?,
        },
        followers_count: row.try_get("followers_count")?,
    })
}

fn row_to_suggestion_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Suggestion> {
    Ok(Suggestion {
        user: UserSummary {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            avatar: row.try_get("avatar")?,
        },
        followers_count: row.try_get("followers_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::tests::{seed_user, setup_pool};
    use crate::models::NotificationKind;

    fn follow_notice(to: i64, from: i64) -> Notification {
        Notification::new(to, from, NotificationKind::Follow, "Followed you")
    }

    async fn unread_count(pool: &DynDatabasePool, user_id: i64) -> i64 {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool.sqlite().unwrap())
            .await
            .unwrap();
        row.get("n")
    }

    #[tokio::test]
    async fn test_toggle_is_symmetric_and_reversible() {
        let pool = setup_pool().await;
        let a = seed_user(&pool, "ana").await;
        let b = seed_user(&pool, "ben").await;
        let repo = SqlxFollowRepository::new(pool.clone());

        let outcome = repo.toggle(a.id, b.id, &follow_notice(b.id, a.id)).await.unwrap();
        assert_eq!(outcome, FollowToggle::Followed);
        assert!(repo.is_following(a.id, b.id).await.unwrap());
        assert!(!repo.is_following(b.id, a.id).await.unwrap());

        let followings: Vec<_> = repo.followings(a.id).await.unwrap().into_iter().map(|u| u.id).collect();
        let followers: Vec<_> = repo.followers(b.id).await.unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(followings, vec![b.id]);
        assert_eq!(followers, vec![a.id]);
        assert_eq!(unread_count(&pool, b.id).await, 1);

        let outcome = repo.toggle(a.id, b.id, &follow_notice(b.id, a.id)).await.unwrap();
        assert_eq!(outcome, FollowToggle::Unfollowed);
        assert!(repo.followings(a.id).await.unwrap().is_empty());
        assert!(repo.followers(b.id).await.unwrap().is_empty());
        // Unfollowing leaves the log untouched
        assert_eq!(unread_count(&pool, b.id).await, 1);
    }

    #[tokio::test]
    async fn test_relations_keep_insertion_order() {
        let pool = setup_pool().await;
        let target = seed_user(&pool, "target").await;
        let c = seed_user(&pool, "cid").await;
        let a = seed_user(&pool, "ana").await;
        let b = seed_user(&pool, "ben").await;
        let repo = SqlxFollowRepository::new(pool.clone());

        for follower in [&b, &c, &a] {
            repo.toggle(follower.id, target.id, &follow_notice(target.id, follower.id))
                .await
                .unwrap();
        }

        let names: Vec<_> = repo
            .followers(target.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["ben", "cid", "ana"]);
    }

    #[tokio::test]
    async fn test_suggestions_rank_by_followers() {
        let pool = setup_pool().await;
        let me = seed_user(&pool, "me").await;
        let star = seed_user(&pool, "star").await;
        let mid1 = seed_user(&pool, "mid1").await;
        let mid2 = seed_user(&pool, "mid2").await;
        let repo = SqlxFollowRepository::new(pool.clone());

        // Fans give star 5 followers and each mid 3
        let mut fans = Vec::new();
        for i in 0..5 {
            fans.push(seed_user(&pool, &format!("fan{}", i)).await);
        }
        for fan in &fans {
            repo.toggle(fan.id, star.id, &follow_notice(star.id, fan.id)).await.unwrap();
        }
        for fan in &fans[..3] {
            repo.toggle(fan.id, mid1.id, &follow_notice(mid1.id, fan.id)).await.unwrap();
            repo.toggle(fan.id, mid2.id, &follow_notice(mid2.id, fan.id)).await.unwrap();
        }

        let top = repo.suggestions(me.id, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user.id, star.id);
        assert_eq!(top[0].followers_count, 5);
        assert!(top[1].user.id == mid1.id || top[1].user.id == mid2.id);
        assert_eq!(top[1].followers_count, 3);

        repo.toggle(me.id, star.id, &follow_notice(star.id, me.id)).await.unwrap();
        let all = repo.suggestions(me.id, 100).await.unwrap();
        assert!(all.iter().all(|s| s.user.id != me.id && s.user.id != star.id));
        assert!(all
            .windows(2)
            .all(|pair| pair[0].followers_count >= pair[1].followers_count));
    }
}
