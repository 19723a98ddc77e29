use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_client_core::{AuthApiTransport, AuthSessionState, normalize_base_url};
use reqwest::StatusCode;
use reqwest::cookie::{CookieStore, Jar};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    ChatClient, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS, build_http_client,
    request_id,
};

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

#[derive(Debug, Error)]
pub enum RefreshTransportError {
    #[error("auth_base_url_invalid:{message}")]
    BaseUrl { message: String },
    #[error("auth_request_failed:{message}")]
    Request { message: String },
    #[error("auth_refresh_unauthorized")]
    Unauthorized,
    #[error("auth_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("auth_refresh_missing_access_token")]
    MissingAccessToken,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshBody {
    #[serde(default, alias = "accessToken", alias = "token")]
    access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default, alias = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Cookie-based session endpoints of the web front-end.
#[derive(Debug, Clone)]
pub struct HttpAuthTransport {
    base_url: String,
    request_timeout: Duration,
    http: reqwest::Client,
    cookies: Arc<Jar>,
}

impl HttpAuthTransport {
    pub fn new(base_url: &str, cookies: Arc<Jar>) -> Result<Self, RefreshTransportError> {
        let base_url = normalize_base_url(base_url).map_err(|error| {
            RefreshTransportError::BaseUrl {
                message: error.to_string(),
            }
        })?;
        let http = build_http_client(&cookies, DEFAULT_CONNECT_TIMEOUT_MS).map_err(|error| {
            RefreshTransportError::Request {
                message: error.to_string(),
            }
        })?;
        Ok(Self {
            base_url,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            http,
            cookies,
        })
    }

    /// Shares the chat client's base url, cookie jar and request timeout.
    pub fn for_client(client: &ChatClient) -> Result<Self, RefreshTransportError> {
        Ok(Self::new(client.base_url(), client.cookie_jar())?
            .with_request_timeout(client.request_timeout()))
    }

    /// Bounds each refresh and logout call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, RefreshTransportError> {
        reqwest::Url::parse(&format!("{}{path}", self.base_url)).map_err(|error| {
            RefreshTransportError::BaseUrl {
                message: error.to_string(),
            }
        })
    }

    fn seed_refresh_cookie(&self, url: &reqwest::Url, current: Option<&AuthSessionState>) {
        let Some(refresh_token) = current
            .and_then(|state| state.refresh_token.as_deref())
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            return;
        };
        if self.cookie_value(url, REFRESH_TOKEN_COOKIE).is_none() {
            self.cookies
                .add_cookie_str(&format!("{REFRESH_TOKEN_COOKIE}={refresh_token}; Path=/"), url);
        }
    }

    fn cookie_value(&self, url: &reqwest::Url, name: &str) -> Option<String> {
        let header = self.cookies.cookies(url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
    }
}

#[async_trait]
impl AuthApiTransport for HttpAuthTransport {
    type Error = RefreshTransportError;

    async fn refresh_session(
        &self,
        current: Option<&AuthSessionState>,
    ) -> Result<AuthSessionState, Self::Error> {
        let url = self.url(REFRESH_PATH)?;
        self.seed_refresh_cookie(&url, current);

        let response = self
            .http
            .post(url.clone())
            .header("x-request-id", request_id())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|error| RefreshTransportError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RefreshTransportError::Request {
                message: error.to_string(),
            })?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(RefreshTransportError::Unauthorized);
        }
        if !status.is_success() {
            return Err(RefreshTransportError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }

        let body = serde_json::from_slice::<RefreshBody>(&bytes).unwrap_or_default();
        let access_token = body
            .access_token
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.cookie_value(&url, ACCESS_TOKEN_COOKIE))
            .ok_or(RefreshTransportError::MissingAccessToken)?;
        let refresh_token = body
            .refresh_token
            .or_else(|| self.cookie_value(&url, REFRESH_TOKEN_COOKIE))
            .or_else(|| current.and_then(|state| state.refresh_token.clone()));

        Ok(AuthSessionState {
            base_url: self.base_url.clone(),
            access_token,
            refresh_token,
            user_id: body
                .user_id
                .or_else(|| current.and_then(|state| state.user_id.clone())),
            email: body
                .email
                .or_else(|| current.and_then(|state| state.email.clone())),
            issued_at: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    async fn logout(&self, access_token: &str) -> Result<(), Self::Error> {
        let url = self.url(LOGOUT_PATH)?;
        let response = self
            .http
            .post(url)
            .header("x-request-id", request_id())
            .timeout(self.request_timeout)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| RefreshTransportError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RefreshTransportError::Http {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}
