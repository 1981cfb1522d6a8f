//! Chat room repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ChatMessage, ChatRoom};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// The room whose members are exactly `a` and `b`
    async fn find_direct_room(&self, a: i64, b: i64) -> Result<Option<ChatRoom>>;

    /// Create a room with `people` as members, in that order
    async fn create_room(&self, people: &[i64]) -> Result<ChatRoom>;

    async fn get_room(&self, room_id: &str) -> Result<Option<ChatRoom>>;

    /// Rooms `user_id` belongs to, most recently active first
    async fn rooms_for(&self, user_id: i64) -> Result<Vec<ChatRoom>>;

    async fn add_message(&self, room_id: &str, sender_id: i64, message: &str)
        -> Result<ChatMessage>;

    async fn latest_message(&self, room_id: &str) -> Result<Option<ChatMessage>>;
}

pub struct SqlxChatRepository {
    pool: DynDatabasePool,
}

impl SqlxChatRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ChatRepository> {
        Arc::new(Self::new(pool))
    }
}

const DIRECT_ROOM_SQL: &str = r#"
    SELECT a.room_id
    FROM chat_room_members a
    JOIN chat_room_members b ON b.room_id = a.room_id
    WHERE a.user_id = ? AND b.user_id = ?
      AND (SELECT COUNT(*) FROM chat_room_members c WHERE c.room_id = a.room_id) = 2
    LIMIT 1
"#;
const ROOM_SQL: &str = "SELECT id, created_at FROM chat_rooms WHERE id = ?";
const MEMBERS_SQL: &str =
    "SELECT user_id FROM chat_room_members WHERE room_id = ? ORDER BY position";
const USER_ROOMS_SQL: &str = r#"
    SELECT r.id, r.created_at,
           COALESCE((SELECT MAX(m.id) FROM chat_messages m WHERE m.room_id = r.id), 0) AS last_id
    FROM chat_rooms r
    JOIN chat_room_members me ON me.room_id = r.id
    WHERE me.user_id = ?
    ORDER BY last_id DESC, r.created_at DESC
"#;
const USER_ROOM_MEMBERS_SQL: &str = r#"
    SELECT m.room_id, m.user_id
    FROM chat_room_members m
    JOIN chat_room_members me ON me.room_id = m.room_id
    WHERE me.user_id = ?
    ORDER BY m.room_id, m.position
"#;
const INSERT_ROOM_SQL: &str = "INSERT INTO chat_rooms (id, created_at) VALUES (?, ?)";
const INSERT_MEMBER_SQL: &str =
    "INSERT INTO chat_room_members (room_id, user_id, position) VALUES (?, ?, ?)";
const INSERT_MESSAGE_SQL: &str =
    "INSERT INTO chat_messages (room_id, sender_id, message, created_at) VALUES (?, ?, ?, ?)";
const LATEST_MESSAGE_SQL: &str = r#"
    SELECT id, room_id, sender_id, message, created_at
    FROM chat_messages
    WHERE room_id = ?
    ORDER BY id DESC
    LIMIT 1
"#;

#[async_trait]
impl ChatRepository for SqlxChatRepository {
    async fn find_direct_room(&self, a: i64, b: i64) -> Result<Option<ChatRoom>> {
        let room_id: Option<String> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(DIRECT_ROOM_SQL)
                .bind(a)
                .bind(b)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to find direct room")?
                .map(|row| row.try_get("room_id"))
                .transpose()?,
            DatabaseDriver::Mysql => sqlx::query(DIRECT_ROOM_SQL)
                .bind(a)
                .bind(b)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to find direct room")?
                .map(|row| row.try_get("room_id"))
                .transpose()?,
        };

        match room_id {
            Some(id) => self.get_room(&id).await,
            None => Ok(None),
        }
    }

    async fn create_room(&self, people: &[i64]) -> Result<ChatRoom> {
        let room = ChatRoom {
            id: uuid::Uuid::new_v4().to_string(),
            people: people.to_vec(),
            created_at: Utc::now(),
        };

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self.pool.sqlite()?.begin().await?;
                sqlx::query(INSERT_ROOM_SQL)
                    .bind(&room.id)
                    .bind(room.created_at)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to create chat room")?;
                for (position, user_id) in room.people.iter().enumerate() {
                    sqlx::query(INSERT_MEMBER_SQL)
                        .bind(&room.id)
                        .bind(*user_id)
                        .bind(position as i64)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to add chat room member")?;
                }
                tx.commit().await.context("Failed to commit chat room")?;
            }
            DatabaseDriver::Mysql => {
                let mut tx = self.pool.mysql()?.begin().await?;
                sqlx::query(INSERT_ROOM_SQL)
                    .bind(&room.id)
                    .bind(room.created_at)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to create chat room")?;
                for (position, user_id) in room.people.iter().enumerate() {
                    sqlx::query(INSERT_MEMBER_SQL)
                        .bind(&room.id)
                        .bind(*user_id)
                        .bind(position as i64)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to add chat room member")?;
                }
                tx.commit().await.context("Failed to commit chat room")?;
            }
        }

        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<ChatRoom>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let Some(row) = sqlx::query(ROOM_SQL)
                    .bind(room_id)
                    .fetch_optional(pool)
                    .await
                    .context("Failed to get chat room")?
                else {
                    return Ok(None);
                };
                let people = sqlx::query(MEMBERS_SQL)
                    .bind(room_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat room members")?
                    .iter()
                    .map(|row| row.try_get::<i64, _>("user_id"))
                    .collect::<Result<Vec<_>, sqlx::Error>>()?;
                Ok(Some(ChatRoom {
                    id: row.try_get("id")?,
                    people,
                    created_at: row.try_get("created_at")?,
                }))
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let Some(row) = sqlx::query(ROOM_SQL)
                    .bind(room_id)
                    .fetch_optional(pool)
                    .await
                    .context("Failed to get chat room")?
                else {
                    return Ok(None);
                };
                let people = sqlx::query(MEMBERS_SQL)
                    .bind(room_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat room members")?
                    .iter()
                    .map(|row| row.try_get::<i64, _>("user_id"))
                    .collect::<Result<Vec<_>, sqlx::Error>>()?;
                Ok(Some(ChatRoom {
                    id: row.try_get("id")?,
                    people,
                    created_at: row.try_get("created_at")?,
                }))
            }
        }
    }

    async fn rooms_for(&self, user_id: i64) -> Result<Vec<ChatRoom>> {
        let (mut rooms, members) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let rooms = sqlx::query(USER_ROOMS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat rooms")?
                    .iter()
                    .map(|row| {
                        Ok(ChatRoom {
                            id: row.try_get("id")?,
                            people: Vec::new(),
                            created_at: row.try_get("created_at")?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()?;
                let members = sqlx::query(USER_ROOM_MEMBERS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat room members")?
                    .iter()
                    .map(|row| Ok((row.try_get("room_id")?, row.try_get("user_id")?)))
                    .collect::<Result<Vec<(String, i64)>, sqlx::Error>>()?;
                (rooms, members)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let rooms = sqlx::query(USER_ROOMS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat rooms")?
                    .iter()
                    .map(|row| {
                        Ok(ChatRoom {
                            id: row.try_get("id")?,
                            people: Vec::new(),
                            created_at: row.try_get("created_at")?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()?;
                let members = sqlx::query(USER_ROOM_MEMBERS_SQL)
                    .bind(user_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list chat room members")?
                    .iter()
                    .map(|row| Ok((row.try_get("room_id")?, row.try_get("user_id")?)))
                    .collect::<Result<Vec<(String, i64)>, sqlx::Error>>()?;
                (rooms, members)
            }
        };

        let mut people: HashMap<String, Vec<i64>> = HashMap::new();
        for (room_id, member) in members {
            people.entry(room_id).or_default().push(member);
        }
        for room in &mut rooms {
            room.people = people.remove(&room.id).unwrap_or_default();
        }
        Ok(rooms)
    }

    async fn add_message(
        &self,
        room_id: &str,
        sender_id: i64,
        message: &str,
    ) -> Result<ChatMessage> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_MESSAGE_SQL)
                .bind(room_id)
                .bind(sender_id)
                .bind(message)
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to store chat message")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(INSERT_MESSAGE_SQL)
                .bind(room_id)
                .bind(sender_id)
                .bind(message)
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to store chat message")?
                .last_insert_id() as i64,
        };

        Ok(ChatMessage {
            id,
            room_id: room_id.to_string(),
            sender_id,
            message: message.to_string(),
            created_at: now,
        })
    }

    async fn latest_message(&self, room_id: &str) -> Result<Option<ChatMessage>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(LATEST_MESSAGE_SQL)
                    .bind(room_id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get latest chat message")?;
                row.as_ref().map(row_to_message_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(LATEST_MESSAGE_SQL)
                    .bind(room_id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get latest chat message")?;
                row.as_ref().map(row_to_message_mysql).transpose()
            }
        }
    }
}

fn row_to_message_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        sender_id: row.try_get("sender_id")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_message_mysql(row: &sqlx::mysql::MySqlRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        sender_id: row.try_get("sender_id")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}
