#![expect(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
pub struct MockBackendState {
    pub refresh_calls: Arc<AtomicUsize>,
    pub logout_calls: Arc<AtomicUsize>,
}

impl MockBackendState {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub state: MockBackendState,
}

pub async fn start_mock_backend() -> Result<MockBackend> {
    let state = MockBackendState::default();
    let app = Router::new()
        .route("/api/v1/conversations/:id/messages", post(send_message))
        .route(
            "/api/v1/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(MockBackend { base_url, state })
}

/// A base url on which nothing listens.
pub async fn unreachable_base_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{address}"))
}

fn event_stream(chunks: Vec<String>) -> Response {
    let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}

async fn send_message(
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("content").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    match conversation_id.as_str() {
        "split" => event_stream(vec![
            ": connected\n\nda".to_string(),
            "ta: {\"type\":\"message\",\"role\":\"user\",\"con".to_string(),
            format!("tent\":\"{content}\"}}\ndata: {{\"type\":\"token\",\"content\":\"Hel"),
            "lo\"}\ndata: {not json}\ndata: {\"type\":\"tool_call\",\"name\":\"search\"}\n".to_string(),
            "data: {\"type\":\"token\",\"content\":\" there\"}\n\ndata: {\"type\":\"done\"}\n".to_string(),
            "data: {\"type\":\"token\",\"content\":\"after done\"}\n".to_string(),
        ]),
        "error-event" => event_stream(vec![
            "data: {\"type\":\"token\",\"content\":\"partial\"}\n".to_string(),
            "data: {\"type\":\"error\",\"message\":\"model overloaded\"}\n".to_string(),
            "data: {\"type\":\"token\",\"content\":\"ignored\"}\n".to_string(),
        ]),
        "eof" => event_stream(vec![
            "data: {\"type\":\"token\",\"content\":\"a\"}\n".to_string(),
            "data: {\"type\":\"token\",\"content\":\"b\"}".to_string(),
        ]),
        "echo-auth" => {
            let authorization = bearer(&headers).unwrap_or_else(|| "none".to_string());
            let session = cookie(&headers, "session").unwrap_or_else(|| "none".to_string());
            event_stream(vec![
                format!("data: {}\n", json!({"type": "token", "content": authorization})),
                format!("data: {}\n", json!({"type": "token", "content": session})),
                format!("data: {}\n", json!({"type": "token", "content": content})),
                "data: {\"type\":\"done\"}\n".to_string(),
            ])
        }
        "hang" => {
            let first = futures::stream::iter(vec![Ok::<_, Infallible>(
                "data: {\"type\":\"token\",\"content\":\"first\"}\n".to_string(),
            )]);
            let body = first.chain(futures::stream::pending());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(body),
            )
                .into_response()
        }
        "sync" => (
            StatusCode::OK,
            axum::Json(json!({
                "user_message": {"id": "m1", "content": content},
                "ai_message": {"id": "m2", "content": "hello"},
            })),
        )
            .into_response(),
        "sync-malformed" => {
            (StatusCode::OK, axum::Json(json!({"status": "queued"}))).into_response()
        }
        "fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({"error": "boom"})),
        )
            .into_response(),
        "fail-html" => (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"message": "conversation not found"})),
        )
            .into_response(),
    }
}

async fn list_conversations(headers: HeaderMap) -> Response {
    match bearer(&headers).as_deref() {
        Some("fresh-token" | "cookie-access") => axum::Json(json!({
            "conversations": [
                {"id": "c1", "title": "Trip planning", "agent_id": "travel"},
                {"id": "c2"},
            ]
        }))
        .into_response(),
        Some("forbidden-token") => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": "agent access revoked"})),
        )
            .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({"error": "Unauthorized"})),
        )
            .into_response(),
    }
}

async fn create_conversation(headers: HeaderMap, body: String) -> Response {
    if bearer(&headers).as_deref() != Some("fresh-token") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let request = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
    axum::Json(json!({
        "id": "c3",
        "title": request.get("title").cloned().unwrap_or(Value::Null),
        "agent_id": request.get("agent_id").cloned().unwrap_or(Value::Null),
    }))
    .into_response()
}

async fn refresh(State(state): State<MockBackendState>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    match cookie(&headers, "refresh_token").as_deref() {
        Some("refresh-1") => (
            StatusCode::OK,
            AppendHeaders([
                (header::SET_COOKIE, "access_token=cookie-access; Path=/; HttpOnly"),
                (header::SET_COOKIE, "refresh_token=refresh-2; Path=/; HttpOnly"),
            ]),
            axum::Json(json!({"success": true})),
        )
            .into_response(),
        Some("refresh-body") => axum::Json(json!({
            "success": true,
            "accessToken": "body-access",
            "userId": "user-7",
        }))
        .into_response(),
        Some("refresh-empty") => axum::Json(json!({"success": true})).into_response(),
        Some("refresh-hang") => futures::future::pending().await,
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::SET_COOKIE, "refresh_token=; Path=/; Max-Age=0")],
            axum::Json(json!({"error": "refresh token expired"})),
        )
            .into_response(),
    }
}

async fn logout(State(state): State<MockBackendState>, headers: HeaderMap) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if bearer(&headers).is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::UNAUTHORIZED
    }
}
