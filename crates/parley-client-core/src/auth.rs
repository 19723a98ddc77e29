use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
pub const ENV_API_BASE_URL: &str = "PARLEY_API_BASE_URL";
pub const ENV_API_BASE_URL_LEGACY: &str = "PARLEY_BACKEND_URL";
pub const API_BASE_SOURCE_DEFAULT_LOCAL: &str = "default_local";

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSessionState {
    pub base_url: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
}

impl AuthSessionState {
    #[must_use]
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            refresh_token: None,
            user_id: None,
            email: None,
            issued_at: None,
        }
    }
}

/// Persistent home of the session: a file for the CLI, memory for tests.
pub trait AuthStateStore {
    type Error;

    fn load_auth_state(&self) -> Result<Option<AuthSessionState>, Self::Error>;
    fn persist_auth_state(&self, state: &AuthSessionState) -> Result<(), Self::Error>;
    fn clear_auth_state(&self) -> Result<(), Self::Error>;
}

#[async_trait]
pub trait AuthApiTransport {
    type Error;

    /// Rotates the session. `current` is whatever the store held, which may be
    /// nothing when the refresh token only lives in a cookie.
    async fn refresh_session(
        &self,
        current: Option<&AuthSessionState>,
    ) -> Result<AuthSessionState, Self::Error>;
    async fn logout(&self, access_token: &str) -> Result<(), Self::Error>;
}

pub fn resolve_api_base_url() -> Result<(String, &'static str), AuthInputError> {
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL));
    }
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL_LEGACY) {
        return normalize_base_url(&base_url)
            .map(|normalized| (normalized, ENV_API_BASE_URL_LEGACY));
    }
    normalize_base_url(DEFAULT_API_BASE_URL)
        .map(|normalized| (normalized, API_BASE_SOURCE_DEFAULT_LOCAL))
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

#[must_use]
pub fn login_url(base_url: &str) -> String {
    format!("{}{LOGIN_PATH}", base_url.trim_end_matches('/'))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}
