//! API layer - HTTP handlers and routing
//!
//! Everything lives under `/api/v1`:
//! - Auth endpoints (`/auth`)
//! - User, follow, notification and password endpoints (`/user`)
//! - Chat endpoints, including the WebSocket feed (`/chat`)
//!
//! Uploaded avatars are served from `/uploads`.

pub mod auth;
pub mod chat;
pub mod middleware;
pub mod responses;
pub mod upload;
pub mod users;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware, Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Multipart overhead allowed on top of the largest accepted file
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let body_limit = state.upload_config.max_file_size as usize + MULTIPART_OVERHEAD;

    // Protected routes (need auth)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/user", users::protected_router(body_limit))
        .nest("/chat", chat::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/user", users::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;

    // Credentials are allowed so the session cookie works cross-origin
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    let uploads = ServeDir::new(&state.upload_config.path);

    Ok(Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .nest_service("/uploads", uploads)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
