use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The only error value that triggers a refresh-and-retry.
pub const UNAUTHORIZED_SENTINEL: &str = "Unauthorized";

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Outcome of a remote action. Actions report failures in-band instead of
/// returning `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerActionResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ServerActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn unauthorized() -> Self {
        Self::failure(UNAUTHORIZED_SENTINEL)
    }

    pub fn is_unauthorized(&self) -> bool {
        !self.success && self.error.as_deref() == Some(UNAUTHORIZED_SENTINEL)
    }

    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "unknown action failure".to_string()))
        }
    }
}

#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh_session(&self) -> Result<(), String>;
}

/// Side effect performed when a session cannot be recovered.
pub trait LoginNavigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Runs remote actions with one automatic recovery from `"Unauthorized"`.
///
/// The action may run twice with identical inputs, so it must be safe to
/// repeat.
pub struct AuthRetryPolicy<'a, R: ?Sized, N: ?Sized> {
    refresher: &'a R,
    navigator: &'a N,
}

impl<'a, R, N> AuthRetryPolicy<'a, R, N>
where
    R: SessionRefresher + ?Sized,
    N: LoginNavigator + ?Sized,
{
    pub fn new(refresher: &'a R, navigator: &'a N) -> Self {
        Self {
            refresher,
            navigator,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut action: F) -> ServerActionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServerActionResult<T>>,
    {
        let first = action().await;
        if !first.is_unauthorized() {
            return first;
        }

        tracing::debug!("action reported unauthorized; refreshing session");
        match self.refresher.refresh_session().await {
            Ok(()) => action().await,
            Err(error) => {
                tracing::warn!(error = %error, "session refresh failed; redirecting to login");
                self.navigator.redirect_to_login();
                ServerActionResult::failure(SESSION_EXPIRED_MESSAGE)
            }
        }
    }
}
