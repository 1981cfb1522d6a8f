//! User API endpoints
//!
//! Public:
//! - GET /api/v1/user/{username} - Expanded profile
//! - GET /api/v1/user/get/{id} - User by id
//! - GET /api/v1/user/followings/{user_id}, /followers/{user_id}
//! - POST /api/v1/user/password/reset - Mail a reset link
//! - GET /api/v1/user/password/check/{token} - Check a reset link
//! - POST /api/v1/user/password/new - Set a password with a reset link
//!
//! Authenticated:
//! - POST /api/v1/user/follow/{user_id} - Toggle follow
//! - GET /api/v1/user/notifications, /notifications/has
//! - POST /api/v1/user/notifications/read
//! - PUT /api/v1/user/update - Profile update (multipart)
//! - GET /api/v1/user/search/{text}, /suggestions, /all
//! - POST /api/v1/user/password/change

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{
    MarkReadResponse, ProfileUpdatedResponse, Success, SuccessMessage, UnreadResponse,
};
use crate::api::upload;
use crate::models::{
    NotificationView, Profile, ResetTokenStatus, Suggestion, UpdateProfileInput, User,
};
use crate::services::{ChangePasswordInput, DEFAULT_SUGGESTIONS};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    /// Email or username
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct NewPasswordRequest {
    pub token: String,
    pub password: String,
}

/// Kept as text so a malformed value gets the API error body
#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    pub limit: Option<String>,
}

/// Build public user routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/{username}", get(get_profile))
        .route("/get/{id}", get(get_user))
        .route("/followings/{user_id}", get(followings))
        .route("/followers/{user_id}", get(followers))
        .route("/password/reset", post(request_reset))
        .route("/password/check/{token}", get(check_reset))
        .route("/password/new", post(new_password))
}

/// Build protected user routes (requires auth middleware).
///
/// `body_limit` caps the multipart profile update.
pub fn protected_router(body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/follow/{user_id}", post(toggle_follow))
        .route("/notifications", get(notifications))
        .route("/notifications/has", get(has_notifications))
        .route("/notifications/read", post(mark_notifications_read))
        .route(
            "/update",
            put(update_profile).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/search/{text}", get(search))
        .route("/suggestions", get(suggestions))
        .route("/password/change", post(change_password))
        .route("/all", get(list_all))
}

/// GET /api/v1/user/{username}
async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(state.user_service.get_profile(&username).await?))
}

/// GET /api/v1/user/get/{id}
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.user_service.get_by_id(id).await?))
}

/// GET /api/v1/user/followings/{user_id}
async fn followings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.social_service.followings(user_id).await?))
}

/// GET /api/v1/user/followers/{user_id}
async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.social_service.followers(user_id).await?))
}

/// POST /api/v1/user/follow/{user_id}
///
/// Follows, or unfollows when already following.
async fn toggle_follow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<i64>,
) -> Result<Json<SuccessMessage>, ApiError> {
    state.social_service.toggle_follow(user.0.id, user_id).await?;
    Ok(Json(SuccessMessage::new("done")))
}

/// GET /api/v1/user/notifications/has
async fn has_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UnreadResponse>, ApiError> {
    let notifications = state.social_service.has_unread(user.0.id).await?;
    Ok(Json(UnreadResponse { notifications }))
}

/// GET /api/v1/user/notifications
async fn notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    Ok(Json(state.social_service.notifications(user.0.id).await?))
}

/// POST /api/v1/user/notifications/read
async fn mark_notifications_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = state.social_service.mark_read(user.0.id).await?;
    Ok(Json(MarkReadResponse {
        success: true,
        updated,
    }))
}

/// PUT /api/v1/user/update
///
/// Multipart fields `name`, `bio` and an optional image in `avatar` or
/// `file`. Missing text fields are stored as empty.
async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<ProfileUpdatedResponse>, ApiError> {
    let mut input = UpdateProfileInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "name" | "bio" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation_error(format!("Invalid field: {}", e)))?;
                if name == "name" {
                    input.name = text.trim().to_string();
                } else {
                    input.bio = text.trim().to_string();
                }
            }
            "avatar" | "file" => {
                // An empty file input still sends the part
                if field.file_name().map_or(true, str::is_empty) {
                    continue;
                }
                input.avatar = Some(upload::save_image(&state.upload_config, field).await?);
            }
            _ => {}
        }
    }

    let profile = state.user_service.update_profile(user.0.id, input).await?;
    Ok(Json(ProfileUpdatedResponse {
        success: true,
        user: profile,
    }))
}

/// GET /api/v1/user/search/{text}
async fn search(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(text): Path<String>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.user_service.search(user.0.id, &text).await?))
}

/// GET /api/v1/user/suggestions?limit=N
async fn suggestions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<Vec<Suggestion>>, ApiError> {
    let limit = match query.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_SUGGESTIONS,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or_else(|| ApiError::validation_error("limit must be a non-negative integer"))?,
    };
    Ok(Json(state.social_service.suggestions(user.0.id, limit).await?))
}

/// POST /api/v1/user/password/change
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<SuccessMessage>, ApiError> {
    state
        .user_service
        .change_password(
            user.0.id,
            ChangePasswordInput {
                password: body.password,
                new_password: body.new_password,
                confirm_password: body.confirm_password,
            },
        )
        .await?;
    Ok(Json(SuccessMessage::new("Updated password")))
}

/// GET /api/v1/user/all
async fn list_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.user_service.list_all(user.0.id).await?))
}

/// POST /api/v1/user/password/reset
async fn request_reset(
    State(state): State<AppState>,
    Json(body): Json<ResetRequest>,
) -> Result<Json<SuccessMessage>, ApiError> {
    state.reset_service.request_reset(&body.text).await?;
    Ok(Json(SuccessMessage::new("Reset link sent to email")))
}

/// GET /api/v1/user/password/check/{token}
async fn check_reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Success>, ApiError> {
    match state.reset_service.check(&token).await? {
        ResetTokenStatus::Valid => Ok(Json(Success::ok())),
        ResetTokenStatus::Invalid => Err(ApiError::not_found("Invalid Link")),
        ResetTokenStatus::Expired => Err(ApiError::expired("Link Expired")),
    }
}

/// POST /api/v1/user/password/new
async fn new_password(
    State(state): State<AppState>,
    Json(body): Json<NewPasswordRequest>,
) -> Result<Json<SuccessMessage>, ApiError> {
    state
        .reset_service
        .reset(&body.token, &body.password)
        .await?;
    Ok(Json(SuccessMessage::new("Password updated")))
}
