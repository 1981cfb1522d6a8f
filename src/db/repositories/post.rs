//! Post repository (read side)
//!
//! Loads a user's posts with likes and comments in three queries and
//! stitches them together.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{CommentAuthor, CommentView, Post, PostView};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Posts of `user_id`, newest first, with likes and comments expanded
    async fn list_expanded_by_user(&self, user_id: i64) -> Result<Vec<PostView>>;
}

pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

const POSTS_SQL: &str =
    "SELECT id, user_id, caption, files, created_at FROM posts WHERE user_id = ? ORDER BY id DESC";
const LIKES_SQL: &str = r#"
    SELECT l.post_id, l.user_id
    FROM post_likes l
    JOIN posts p ON p.id = l.post_id
    WHERE p.user_id = ?
    ORDER BY l.post_id, l.user_id
"#;
const COMMENTS_SQL: &str = r#"
    SELECT c.id, c.post_id, c.comment, c.created_at,
           u.id AS author_id, u.username AS author_username, u.avatar AS author_avatar
    FROM comments c
    JOIN posts p ON p.id = c.post_id
    JOIN users u ON u.id = c.user_id
    WHERE p.user_id = ?
    ORDER BY c.id
"#;

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn list_expanded_by_user(&self, user_id: i64) -> Result<Vec<PostView>> {
        let (posts, likes, comments) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let posts = sqlx::query(POSTS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list posts")?
                    .iter()
                    .map(row_to_post_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let likes = sqlx::query(LIKES_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list post likes")?
                    .iter()
                    .map(row_to_like_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let comments = sqlx::query(COMMENTS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list comments")?
                    .iter()
                    .map(row_to_comment_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                (posts, likes, comments)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let posts = sqlx::query(POSTS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list posts")?
                    .iter()
                    .map(row_to_post_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let likes = sqlx::query(LIKES_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list post likes")?
                    .iter()
                    .map(row_to_like_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let comments = sqlx::query(COMMENTS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list comments")?
                    .iter()
                    .map(row_to_comment_mysql)
                    .collect::<Result<Vec<_>>>()?;
                (posts, likes, comments)
            }
        };

        Ok(assemble(posts, likes, comments))
    }
}

/// Attach likes and comments to their posts, preserving each input's order
fn assemble(
    posts: Vec<Post>,
    likes: Vec<(i64, i64)>,
    comments: Vec<(i64, CommentView)>,
) -> Vec<PostView> {
    let mut likes_by_post: HashMap<i64, Vec<i64>> = HashMap::new();
    for (post_id, user_id) in likes {
        likes_by_post.entry(post_id).or_default().push(user_id);
    }
    let mut comments_by_post: HashMap<i64, Vec<CommentView>> = HashMap::new();
    for (post_id, comment) in comments {
        comments_by_post.entry(post_id).or_default().push(comment);
    }

    posts
        .into_iter()
        .map(|post| PostView {
            likes: likes_by_post.remove(&post.id).unwrap_or_default(),
            comments: comments_by_post.remove(&post.id).unwrap_or_default(),
            id: post.id,
            caption: post.caption,
            files: post.files,
            created_at: post.created_at,
        })
        .collect()
}

fn parse_files(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("Invalid post files column: {}", raw))
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    let files: String = row.try_get("files")?;
    Ok(Post {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        caption: row.try_get("caption")?,
        files: parse_files(&files)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_like_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<(i64, i64)> {
    Ok((row.try_get("post_id")?, row.try_get("user_id")?))
}

fn row_to_comment_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<(i64, CommentView)> {
    Ok((
        row.try_get("post_id")?,
        CommentView {
            id: row.try_get("id")?,
            comment: row.try_get("comment")?,
            created_at: row.try_get("created_at")?,
            user: CommentAuthor {
                id: row.try_get("author_id")?,
                username: row.try_get("author_username")?,
                avatar: row.try_get("author_avatar")?,
            },
        },
    ))
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    let files: String = row.try_get("files")?;
    Ok(Post {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        caption: row.try_get("caption")?,
        files: parse_files(&files)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_like_mysql(row: &sqlx::mysql::MySqlRow) -> Result<(i64, i64)> {
    Ok((row.try_get("post_id")?, row.try_get("user_id")?))
}

fn row_to_comment_mysql(row: &sqlx::mysql::MySqlRow) -> Result<(i64, CommentView)> {
    Ok((
        row.try_get("post_id")?,
        CommentView {
            id: row.try_get("id")?,
            comment: row.try_get("comment")?,
            created_at: row.try_get("created_at")?,
            user: CommentAuthor {
                id: row.try_get("author_id")?,
                username: row.try_get("author_username")?,
                avatar: row.try_get("author_avatar")?,
            },
        },
    ))
}
