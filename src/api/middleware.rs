//! API middleware
//!
//! Contains:
//! - Application state shared by every handler
//! - The error type every handler returns
//! - Authentication (session token validation) and the `AuthenticatedUser`
//!   extractor

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AuthConfig, Config, UploadConfig};
use crate::db::repositories::{
    SqlxChatRepository, SqlxFollowRepository, SqlxNotificationRepository, SqlxPostRepository,
    SqlxResetTokenRepository, SqlxSessionRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    ChatService, ChatServiceError, Mailer, PasswordResetError, PasswordResetService,
    RoomBroadcast, SocialService, SocialServiceError, UserService, UserServiceError,
};

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub social_service: Arc<SocialService>,
    pub reset_service: Arc<PasswordResetService>,
    pub chat_service: Arc<ChatService>,
    pub upload_config: Arc<UploadConfig>,
    pub auth_config: Arc<AuthConfig>,
}

impl AppState {
    /// Wire repositories and services over one pool
    pub fn new(pool: DynDatabasePool, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let follow_repo = SqlxFollowRepository::boxed(pool.clone());

        let user_service = UserService::new(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            follow_repo.clone(),
            SqlxPostRepository::boxed(pool.clone()),
        )
        .with_session_days(config.auth.session_days);

        let social_service = SocialService::new(
            user_repo.clone(),
            follow_repo,
            SqlxNotificationRepository::boxed(pool.clone()),
        );

        let reset_service = PasswordResetService::new(
            user_repo.clone(),
            SqlxResetTokenRepository::boxed(pool.clone()),
            mailer,
            config.auth.client_url.clone(),
            config.auth.reset_token_hours,
        );

        let chat_service = ChatService::new(
            SqlxChatRepository::boxed(pool),
            user_repo,
            Arc::new(RoomBroadcast::new()),
        );

        Self {
            user_service: Arc::new(user_service),
            social_service: Arc::new(social_service),
            reset_service: Arc::new(reset_service),
            chat_service: Arc::new(chat_service),
            upload_config: Arc::new(config.upload.clone()),
            auth_config: Arc::new(config.auth.clone()),
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Error body returned by every endpoint: `{success: false, code, message}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new("EXPIRED", message)
    }

    /// Logs `error` and hides it from the client
    pub fn internal_error(error: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", error);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "EXPIRED" => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::NotFound(msg) => ApiError::not_found(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<SocialServiceError> for ApiError {
    fn from(e: SocialServiceError) -> Self {
        match e {
            SocialServiceError::NotFound(msg) => ApiError::not_found(msg),
            SocialServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            SocialServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<PasswordResetError> for ApiError {
    fn from(e: PasswordResetError) -> Self {
        match e {
            PasswordResetError::UserNotFound | PasswordResetError::InvalidLink => {
                ApiError::not_found(e.to_string())
            }
            PasswordResetError::LinkExpired => ApiError::expired(e.to_string()),
            PasswordResetError::ValidationError(msg) => ApiError::validation_error(msg),
            PasswordResetError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<ChatServiceError> for ApiError {
    fn from(e: ChatServiceError) -> Self {
        match e {
            ChatServiceError::NotFound(msg) => ApiError::not_found(msg),
            ChatServiceError::Forbidden => ApiError::forbidden(e.to_string()),
            ChatServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            ChatServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

/// Extract the session token from `Authorization: Bearer` or the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    for cookie_header in headers.get_all(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some((name, value)) = cookie.trim().split_once('=') {
                    if name == SESSION_COOKIE && !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
