//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Create an account and sign in
//! - POST /api/v1/auth/login - Sign in with username or email
//! - POST /api/v1/auth/logout - End the current session
//! - GET /api/v1/auth/me - Current user

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    extract_session_token, ApiError, AppState, AuthenticatedUser, SESSION_COOKIE,
};
use crate::models::{CreateUserInput, User};
use crate::services::LoginInput;

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state
        .user_service
        .register(CreateUserInput {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;

    let (user, session) = state
        .user_service
        .login(LoginInput {
            username_or_email: user.username,
            password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        session_cookie(&session.id, state.auth_config.session_days)?,
        Json(AuthResponse {
            user,
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, session) = state
        .user_service
        .login(LoginInput {
            username_or_email: body.username_or_email,
            password: body.password,
        })
        .await?;

    Ok((
        session_cookie(&session.id, state.auth_config.session_days)?,
        Json(AuthResponse {
            user,
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&request_headers) {
        state.user_service.logout(&token).await?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            SESSION_COOKIE
        ))
        .map_err(ApiError::internal_error)?,
    );
    Ok((StatusCode::NO_CONTENT, headers))
}

/// GET /api/v1/auth/me
async fn get_current_user(user: AuthenticatedUser) -> Json<User> {
    Json(user.0)
}

fn session_cookie(token: &str, days: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        days * 24 * 60 * 60
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?,
    );
    Ok(headers)
}
