use std::sync::Arc;
use std::time::Duration;

use parley_client_core::{AuthInputError, ServerActionResult, normalize_base_url};
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod auth_transport;
pub mod events;
pub mod sse;
pub mod stream;

pub use auth_transport::{HttpAuthTransport, RefreshTransportError};
pub use events::{StreamEvent, StreamEventError};
pub use sse::SseLineDecoder;
pub use stream::{SendMessageRequest, StreamOutcome};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const SEND_MESSAGE_FALLBACK_ERROR: &str = "Failed to send message";

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    /// Applies to plain request/response calls. Streams are bounded only by
    /// the connect timeout and their own terminal events.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl ChatClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("chat_client_invalid_base_url:{0}")]
    InvalidBaseUrl(#[from] AuthInputError),
    #[error("chat_client_build_failed:{message}")]
    Build { message: String },
    #[error("send_message_request_failed:{message}")]
    Request { message: String },
    #[error("send_message_read_failed:{message}")]
    Read { message: String },
    #[error("send_message_http_{status}:{message}")]
    Http { status: u16, message: String },
    #[error("send_message_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConversationListBody {
    Bare(Vec<ConversationSummary>),
    Wrapped { conversations: Vec<ConversationSummary> },
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the chat backend. Clones share the connection pool and the
/// cookie jar.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    request_timeout: Duration,
    http: reqwest::Client,
    cookies: Arc<Jar>,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatClientError> {
        Self::with_cookie_jar(config, Arc::new(Jar::default()))
    }

    /// Builds a client around an existing jar so the auth transport and the
    /// chat calls see the same session cookies.
    pub fn with_cookie_jar(
        config: ChatClientConfig,
        cookies: Arc<Jar>,
    ) -> Result<Self, ChatClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let http = build_http_client(&cookies, config.connect_timeout_ms)?;
        Ok(Self {
            base_url,
            request_timeout: Duration::from_millis(config.request_timeout_ms.max(250)),
            http,
            cookies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.cookies)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let trimmed = path.trim();
        if trimmed.starts_with('/') {
            format!("{}{}", self.base_url, trimmed)
        } else {
            format!("{}/{}", self.base_url, trimmed)
        }
    }

    #[must_use]
    pub fn conversations_path() -> &'static str {
        "/api/v1/conversations"
    }

    #[must_use]
    pub fn messages_path(conversation_id: &str) -> String {
        format!("/api/v1/conversations/{}/messages", conversation_id.trim())
    }

    pub async fn list_conversations(
        &self,
        access_token: Option<&str>,
    ) -> ServerActionResult<Vec<ConversationSummary>> {
        let request = with_bearer(
            self.http
                .get(self.endpoint(Self::conversations_path()))
                .header("x-request-id", request_id())
                .timeout(self.request_timeout),
            access_token,
        );

        match send_action::<ConversationListBody>(request).await {
            Ok(ConversationListBody::Bare(conversations))
            | Ok(ConversationListBody::Wrapped { conversations }) => {
                ServerActionResult::ok(conversations)
            }
            Err(failure) => failure.into_action_result(),
        }
    }

    pub async fn create_conversation(
        &self,
        access_token: Option<&str>,
        body: &CreateConversationRequest,
    ) -> ServerActionResult<ConversationSummary> {
        let request = with_bearer(
            self.http
                .post(self.endpoint(Self::conversations_path()))
                .header("x-request-id", request_id())
                .timeout(self.request_timeout)
                .json(body),
            access_token,
        );

        match send_action::<ConversationSummary>(request).await {
            Ok(conversation) => ServerActionResult::ok(conversation),
            Err(failure) => failure.into_action_result(),
        }
    }
}

pub(crate) fn build_http_client(
    cookies: &Arc<Jar>,
    connect_timeout_ms: u64,
) -> Result<reqwest::Client, ChatClientError> {
    reqwest::Client::builder()
        .cookie_provider(Arc::clone(cookies))
        .connect_timeout(Duration::from_millis(connect_timeout_ms.max(100)))
        .build()
        .map_err(|error| ChatClientError::Build {
            message: error.to_string(),
        })
}

pub(crate) fn with_bearer(
    request: reqwest::RequestBuilder,
    access_token: Option<&str>,
) -> reqwest::RequestBuilder {
    match access_token.map(str::trim).filter(|token| !token.is_empty()) {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

pub(crate) fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// Extracts the user-facing message from an error body: `error`, then
/// `message`, then a generic fallback.
#[must_use]
pub fn error_message_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error.or(parsed.message))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| SEND_MESSAGE_FALLBACK_ERROR.to_string())
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ChatClientError {
    ChatClientError::Http {
        status: status.as_u16(),
        message: error_message_from_body(body),
    }
}

/// Why a plain request/response action did not produce a body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionFailure {
    Unauthorized,
    Message(String),
}

impl ActionFailure {
    fn into_action_result<T>(self) -> ServerActionResult<T> {
        match self {
            Self::Unauthorized => ServerActionResult::unauthorized(),
            Self::Message(message) => ServerActionResult::failure(message),
        }
    }
}

async fn send_action<T>(request: reqwest::RequestBuilder) -> Result<T, ActionFailure>
where
    T: for<'de> Deserialize<'de>,
{
    let response = request.send().await.map_err(|error| {
        tracing::warn!(error = %error, "action request failed");
        ActionFailure::Message(
            ChatClientError::Request {
                message: error.to_string(),
            }
            .to_string(),
        )
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| {
        ActionFailure::Message(
            ChatClientError::Read {
                message: error.to_string(),
            }
            .to_string(),
        )
    })?;

    if status == StatusCode::UNAUTHORIZED {
        return Err(ActionFailure::Unauthorized);
    }
    if !status.is_success() {
        return Err(ActionFailure::Message(error_message_from_body(&bytes)));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| {
        ActionFailure::Message(
            ChatClientError::Decode {
                message: error.to_string(),
            }
            .to_string(),
        )
    })
}
