//! User model
//!
//! A user is both an account (credentials) and a public profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::post::PostView;

/// Registered user.
///
/// `password_hash` is never serialized, so a `User` can be returned from any
/// endpoint as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2 PHC string)
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Display name
    pub name: String,
    pub bio: String,
    /// Public path of the avatar, e.g. `/uploads/<file>`
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with an already hashed password.
    ///
    /// The display name starts out as the username.
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            name: username.clone(),
            username,
            email,
            password_hash,
            bio: String::new(),
            avatar: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// The identity fields used wherever another user is referenced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// Input for creating a new user (before password hashing)
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    /// Plaintext password (will be hashed)
    pub password: String,
}

/// New profile fields; `name` and `bio` always overwrite
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub name: String,
    pub bio: String,
    /// New avatar path, `None` keeps the current one
    pub avatar: Option<String>,
}

/// A profile with its relations expanded
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    /// Users following this profile, oldest edge first
    pub followers: Vec<UserSummary>,
    /// Users this profile follows, oldest edge first
    pub followings: Vec<UserSummary>,
    /// Posts, newest first
    pub posts: Vec<PostView>,
    pub followers_count: usize,
    pub followings_count: usize,
    pub posts_count: usize,
}

impl Profile {
    pub fn new(
        user: User,
        followers: Vec<UserSummary>,
        followings: Vec<UserSummary>,
        posts: Vec<PostView>,
    ) -> Self {
        Self {
            followers_count: followers.len(),
            followings_count: followings.len(),
            posts_count: posts.len(),
            user,
            followers,
            followings,
            posts,
        }
    }
}

/// A follow suggestion, ranked by `followers_count`
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    #[serde(flatten)]
    pub user: UserSummary,
    pub followers_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_new_defaults_name_to_username() {
        let user = User::new(
            "ana".to_string(),
            "ana@example.com".to_string(),
            "hash".to_string(),
        );

        assert_eq!(user.id, 0);
        assert_eq!(user.name, "ana");
        assert_eq!(user.bio, "");
        assert!(user.avatar.is_none());
    }

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = User::new(
            "ana".to_string(),
            "ana@example.com".to_string(),
            "$argon2id$secret".to_string(),
        );

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "ana");
    }

    #[test]
    fn test_profile_counts_and_flattening() {
        let mut user = User::new("ana".into(), "ana@example.com".into(), "hash".into());
        user.id = 7;
        let follower = UserSummary {
            id: 8,
            username: "ben".into(),
            name: "Ben".into(),
            avatar: None,
        };

        let profile = Profile::new(user, vec![follower], Vec::new(), Vec::new());
        let json = serde_json::to_value(&profile).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["followers_count"], 1);
        assert_eq!(json["followings_count"], 0);
        assert_eq!(json["posts_count"], 0);
        assert_eq!(json["followers"][0]["username"], "ben");
        assert!(json.get("password_hash").is_none());
    }
}
