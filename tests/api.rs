use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use futures::{SinkExt, Stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, handshake::client::Request as WsRequest,
};
use tower::ServiceExt;

use flock::api::{build_router, AppState};
use flock::config::Config;
use flock::db::{create_test_pool, migrations::run_migrations};
use flock::services::{Email, Mailer};

// ─── Test helpers ───────────────────────────────────────────────────────

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, email: Email) -> Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

impl CapturingMailer {
    fn last_reset_token(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let body = &sent.last().expect("no mail sent").body;
        let start = body.find("/reset/").expect("no reset link") + "/reset/".len();
        body[start..].split_whitespace().next().unwrap().to_string()
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    mailer: Arc<CapturingMailer>,
    uploads: TempDir,
}

async fn test_app() -> TestApp {
    let pool = create_test_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();

    let uploads = TempDir::new().unwrap();
    let mut config = Config::default();
    config.upload.path = uploads.path().to_path_buf();
    config.auth.client_url = "http://client.test".to_string();

    let mailer = Arc::new(CapturingMailer::default());
    let state = AppState::new(pool, mailer.clone(), &config);
    let router = build_router(state.clone(), &config.server.cors_origin).unwrap();

    TestApp {
        router,
        state,
        mailer,
        uploads,
    }
}

impl TestApp {
    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.call(request).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    /// Register a user and return `(id, token)`
    async fn register(&self, username: &str) -> (i64, String) {
        let (status, body) = self
            .post(
                "/api/v1/auth/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "secret",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }
}

// ─── Auth ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_login_me_logout() {
    let app = test_app().await;
    let (id, token) = app.register("ana").await;

    let (status, me) = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"].as_i64(), Some(id));
    assert_eq!(me["username"], "ana");
    assert!(me.get("password_hash").is_none());

    let (status, login) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"username_or_email": "ana@example.com", "password": "secret"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["user"]["id"].as_i64(), Some(id));

    let (status, _) = app
        .request(Method::POST, "/api/v1/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_register_sets_cookie_that_authenticates() {
    let app = test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "ana", "email": "ana@example.com", "password": "pw"}).to_string(),
        ))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));

    let pair = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri("/api/v1/auth/me")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    let (status, me) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "ana");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = test_app().await;
    app.register("ana").await;

    let (status, body) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({"username": "ana", "email": "other@example.com", "password": "pw"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_protected_routes_require_auth() {
    let app = test_app().await;
    for uri in [
        "/api/v1/user/all",
        "/api/v1/user/notifications",
        "/api/v1/user/suggestions",
        "/api/v1/chat",
    ] {
        let (status, _) = app.get(uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
    }
    let (status, _) = app.get("/api/v1/user/all", Some("bogus")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ─── Profiles and follows ───────────────────────────────────────────────

#[tokio::test]
async fn test_follow_toggle_profile_and_notifications() {
    let app = test_app().await;
    let (ana_id, ana) = app.register("ana").await;
    let (ben_id, ben) = app.register("ben").await;

    let (status, body) = app
        .post(&format!("/api/v1/user/follow/{}", ana_id), Some(&ben), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "done"}));

    let (_, profile) = app.get("/api/v1/user/ana", None).await;
    assert_eq!(profile["followers_count"], 1);
    assert_eq!(profile["followers"][0]["id"].as_i64(), Some(ben_id));

    let (_, followings) = app
        .get(&format!("/api/v1/user/followings/{}", ben_id), None)
        .await;
    assert_eq!(followings[0]["username"], "ana");
    assert_eq!(followings[0]["email"], "ana@example.com");
    assert!(followings[0].get("bio").is_some());
    assert!(followings[0].get("created_at").is_some());
    assert!(followings[0].get("password_hash").is_none());

    let (_, has) = app.get("/api/v1/user/notifications/has", Some(&ana)).await;
    assert_eq!(has, json!({"notifications": true}));

    let (_, log) = app.get("/api/v1/user/notifications", Some(&ana)).await;
    assert_eq!(log[0]["content"], "Followed you");
    assert_eq!(log[0]["notification_type"], 3);
    assert_eq!(log[0]["user"]["username"], "ben");

    let (_, read) = app
        .post("/api/v1/user/notifications/read", Some(&ana), json!({}))
        .await;
    assert_eq!(read, json!({"success": true, "updated": 1}));
    let (_, has) = app.get("/api/v1/user/notifications/has", Some(&ana)).await;
    assert_eq!(has, json!({"notifications": false}));

    // Second toggle unfollows
    app.post(&format!("/api/v1/user/follow/{}", ana_id), Some(&ben), json!({}))
        .await;
    let (_, followers) = app
        .get(&format!("/api/v1/user/followers/{}", ana_id), None)
        .await;
    assert_eq!(followers, json!([]));
}

#[tokio::test]
async fn test_follow_errors() {
    let app = test_app().await;
    let (ana_id, ana) = app.register("ana").await;

    let (status, body) = app
        .post(&format!("/api/v1/user/follow/{}", ana_id), Some(&ana), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = app
        .post("/api/v1/user/follow/9999", Some(&ana), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_profile_lookup_and_missing_user() {
    let app = test_app().await;
    let (ana_id, _) = app.register("ana").await;

    let (status, user) = app.get(&format!("/api/v1/user/get/{}", ana_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["username"], "ana");

    let (status, body) = app.get("/api/v1/user/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No user found");
}

#[tokio::test]
async fn test_suggestions_limit_and_validation() {
    let app = test_app().await;
    let (_, ana) = app.register("ana").await;
    let (ben_id, _) = app.register("ben").await;
    let (_, cat) = app.register("cat").await;
    app.register("dan").await;

    app.post(&format!("/api/v1/user/follow/{}", ben_id), Some(&cat), json!({}))
        .await;

    let (status, list) = app.get("/api/v1/user/suggestions?limit=2", Some(&ana)).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["username"], "ben");
    assert_eq!(list[0]["followers_count"], 1);

    let (_, all) = app.get("/api/v1/user/suggestions", Some(&ana)).await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    for bad in ["-1", "two"] {
        let (status, body) = app
            .get(&format!("/api/v1/user/suggestions?limit={}", bad), Some(&ana))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn test_search_and_all_exclude_self() {
    let app = test_app().await;
    let (_, ana) = app.register("ana").await;
    app.register("anabel").await;
    app.register("ben").await;

    let (_, found) = app.get("/api/v1/user/search/ANA", Some(&ana)).await;
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["username"], "anabel");

    let (_, all) = app.get("/api/v1/user/all", Some(&ana)).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_update_profile_with_avatar() {
    let app = test_app().await;
    let (_, ana) = app.register("ana").await;

    let boundary = "flockboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nAna Lee\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"bio\"\r\n\r\nhello\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
             Content-Type: image/png\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"\x89PNGfakeimage");
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/v1/user/update")
        .header(header::AUTHORIZATION, format!("Bearer {}", ana))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, updated) = app.call(request).await;
    assert_eq!(status, StatusCode::OK, "{}", updated);
    assert_eq!(updated["success"], true);
    assert_eq!(updated["user"]["name"], "Ana Lee");
    assert_eq!(updated["user"]["bio"], "hello");

    let avatar = updated["user"]["avatar"].as_str().unwrap().to_string();
    assert!(avatar.starts_with("/uploads/") && avatar.ends_with(".png"));
    let stored = app.uploads.path().join(avatar.trim_start_matches("/uploads/"));
    assert!(stored.exists());

    let request = Request::builder()
        .uri(avatar.as_str())
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ─── Passwords ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_change_password() {
    let app = test_app().await;
    let (_, ana) = app.register("ana").await;

    let (status, body) = app
        .post(
            "/api/v1/user/password/change",
            Some(&ana),
            json!({"password": "wrong", "newPassword": "n", "confirmPassword": "n"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Current password is wrong");

    let (status, body) = app
        .post(
            "/api/v1/user/password/change",
            Some(&ana),
            json!({"password": "secret", "newPassword": "n3w", "confirmPassword": "n3w"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Updated password");

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"username_or_email": "ana", "password": "n3w"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = test_app().await;
    app.register("ana").await;

    let (status, body) = app
        .post("/api/v1/user/password/reset", None, json!({"text": "nobody"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No user found");

    let (status, body) = app
        .post("/api/v1/user/password/reset", None, json!({"text": "ana"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Reset link sent to email");
    let token = app.mailer.last_reset_token();
    assert!(app.mailer.sent.lock().unwrap()[0]
        .body
        .contains(&format!("http://client.test/reset/{}", token)));

    let (status, body) = app
        .get(&format!("/api/v1/user/password/check/{}", token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = app.get("/api/v1/user/password/check/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invalid Link");

    let (status, _) = app
        .post(
            "/api/v1/user/password/new",
            None,
            json!({"token": token, "password": "brand-new"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"username_or_email": "ana", "password": "brand-new"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get(&format!("/api/v1/user/password/check/{}", token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Chat ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_rooms_messages_and_previews() {
    let app = test_app().await;
    let (ana_id, ana) = app.register("ana").await;
    let (ben_id, ben) = app.register("ben").await;
    let (_, eve) = app.register("eve").await;

    let (status, room) = app
        .post("/api/v1/chat", Some(&ana), json!({"user_id": ben_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(room["people"], json!([ana_id, ben_id]));
    let room_id = room["id"].as_str().unwrap().to_string();

    let (_, again) = app
        .post("/api/v1/chat", Some(&ben), json!({"user_id": ana_id}))
        .await;
    assert_eq!(again["id"], room["id"]);

    let (status, _) = app
        .post(
            &format!("/api/v1/chat/{}/messages", room_id),
            Some(&ben),
            json!({"message": "this message is definitely longer than the cutoff"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, preview) = app
        .get(&format!("/api/v1/chat/{}/preview", room_id), Some(&ana))
        .await;
    assert_eq!(preview["name"], "ben");
    assert_eq!(preview["last_message"], "this message is definitely   ...");

    let (_, rooms) = app.get("/api/v1/chat", Some(&ana)).await;
    assert_eq!(rooms.as_array().unwrap().len(), 1);

    let (status, body) = app
        .get(&format!("/api/v1/chat/{}", room_id), Some(&eve))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app.get("/api/v1/chat/no-such-room", Some(&ana)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Chat feed ──────────────────────────────────────────────────────────

fn ws_request(url: &str, token: &str) -> WsRequest {
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no frame in time")
        .expect("stream ended")
        .unwrap();
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_chat_feed_over_websocket() {
    let app = test_app().await;
    let (_, ana) = app.register("ana").await;
    let (ben_id, ben) = app.register("ben").await;
    let (_, eve) = app.register("eve").await;

    let (_, room) = app
        .post("/api/v1/chat", Some(&ana), json!({"user_id": ben_id}))
        .await;
    let room_id = room["id"].as_str().unwrap().to_string();
    let messages_uri = format!("/api/v1/chat/{}/messages", room_id);
    app.post(&messages_uri, Some(&ana), json!({"message": "earlier"}))
        .await;

    // Start server on a real port for WS
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let url = format!("ws://{}/api/v1/chat/{}/latest", addr, room_id);

    // Outsiders are refused before the upgrade
    match tokio_tungstenite::connect_async(ws_request(&url, &eve)).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 403)
        }
        other => panic!("expected a 403, got {:?}", other.map(|_| ())),
    }
    assert_eq!(app.state.chat_service.live_rooms().await, 0);

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_request(&url, &ben))
        .await
        .expect("Failed to connect to WebSocket");

    // Latest stored message comes first
    let first = next_json(&mut ws).await;
    assert_eq!(first["message"], "earlier");
    assert_eq!(app.state.chat_service.live_rooms().await, 1);

    // Then new messages are pushed
    let (status, _) = app
        .post(&messages_uri, Some(&ana), json!({"message": "now"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let pushed = next_json(&mut ws).await;
    assert_eq!(pushed["message"], "now");

    // Closing releases the room channel
    ws.send(tungstenite::Message::Close(None)).await.unwrap();
    let released = async {
        while app.state.chat_service.live_rooms().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), released)
        .await
        .expect("room channel still open after close");

    server.abort();
}
