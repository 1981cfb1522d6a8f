//! Chat API endpoints
//!
//! All routes require authentication:
//! - POST /api/v1/chat - Open (or find) the direct room with a user
//! - GET /api/v1/chat - Room previews of the current user
//! - GET /api/v1/chat/{room_id} - Room members
//! - GET /api/v1/chat/{room_id}/preview - Counterpart and last message
//! - POST /api/v1/chat/{room_id}/messages - Send a message
//! - GET /api/v1/chat/{room_id}/latest - WebSocket feed of new messages

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::RoomResponse;
use crate::models::{ChatMessage, RoomPreview};

#[derive(Debug, Deserialize)]
pub struct OpenRoomRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Build chat routes (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(open_room).get(list_rooms))
        .route("/{room_id}", get(get_room))
        .route("/{room_id}/preview", get(room_preview))
        .route("/{room_id}/messages", post(send_message))
        .route("/{room_id}/latest", get(latest_stream))
}

/// POST /api/v1/chat
async fn open_room(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<OpenRoomRequest>,
) -> Result<Json<RoomResponse>, ApiError> {
    let room = state
        .chat_service
        .open_direct_room(user.0.id, body.user_id)
        .await?;
    Ok(Json(room.into()))
}

/// GET /api/v1/chat
async fn list_rooms(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<RoomPreview>>, ApiError> {
    Ok(Json(state.chat_service.rooms(user.0.id).await?))
}

/// GET /api/v1/chat/{room_id}
async fn get_room(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, ApiError> {
    let room = state.chat_service.get_room(user.0.id, &room_id).await?;
    Ok(Json(room.into()))
}

/// GET /api/v1/chat/{room_id}/preview
async fn room_preview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(room_id): Path<String>,
) -> Result<Json<RoomPreview>, ApiError> {
    Ok(Json(state.chat_service.preview(user.0.id, &room_id).await?))
}

/// POST /api/v1/chat/{room_id}/messages
async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(room_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .chat_service
        .post_message(user.0.id, &room_id, &body.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/chat/{room_id}/latest -- WebSocket upgrade for new messages.
///
/// Membership is checked before upgrading, so outsiders get a plain 403.
/// The room is only joined once the upgrade has completed.
async fn latest_stream(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let room = state.chat_service.get_room(user.0.id, &room_id).await?;
    let user_id = user.0.id;
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, user_id, room.id)))
}

async fn handle_ws(socket: WebSocket, state: AppState, user_id: i64, room_id: String) {
    let (latest, mut rx) = match state.chat_service.subscribe(user_id, &room_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!("Failed to join room {} feed: {}", room_id, e);
            return;
        }
    };
    let (mut sender, mut receiver) = socket.split();

    // 1. Current latest message, if the room has one
    let backfill_ok = match latest {
        Some(message) => send_json(&mut sender, &message).await,
        None => true,
    };

    // 2. Forward new messages until either side goes away
    if backfill_ok {
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(message) => {
                            if !send_json(&mut sender, &message).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("WebSocket subscriber lagged by {} messages in room {}", n, room_id);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {} // ignore pings/pongs/text from client
                    }
                }
            }
        }
    }

    // 3. Cleanup; the receiver must be gone before the room is released
    drop(rx);
    state.chat_service.unsubscribe(&room_id).await;
}

/// Send `message` as a JSON text frame; false once the socket is unusable
async fn send_json<S>(sender: &mut S, message: &ChatMessage) -> bool
where
    S: futures::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode chat message {}: {}", message.id, e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
