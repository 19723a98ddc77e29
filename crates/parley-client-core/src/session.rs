use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::action::SessionRefresher;
use crate::auth::{AuthApiTransport, AuthSessionState, AuthStateStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("auth_refresh_failed:{message}")]
    Transport { message: String },
    #[error("auth_store_failed:{message}")]
    Store { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignOutError {
    #[error("auth_store_failed:{message}")]
    Store { message: String },
}

#[derive(Default)]
struct RefreshGate {
    completed: u64,
    last: Option<Result<AuthSessionState, RefreshError>>,
}

/// Process-wide owner of the auth session.
///
/// Every refresh call site (the proactive scheduler, the 401 retry wrapper,
/// manual refreshes) goes through [`AuthSessionManager::refresh`], which
/// coalesces concurrent callers into one transport call.
pub struct AuthSessionManager<T, S> {
    transport: T,
    store: S,
    gate: Mutex<RefreshGate>,
    completed: AtomicU64,
    refreshing: AtomicBool,
}

struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T, S> AuthSessionManager<T, S>
where
    T: AuthApiTransport + Send + Sync,
    T::Error: Display,
    S: AuthStateStore + Send + Sync,
    S::Error: Display,
{
    pub fn new(transport: T, store: S) -> Self {
        Self {
            transport,
            store,
            gate: Mutex::new(RefreshGate::default()),
            completed: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// True while a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Number of refreshes that reached the transport and settled.
    pub fn completed_refreshes(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> Option<AuthSessionState> {
        match self.store.load_auth_state() {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(error = %error, "failed to load auth state");
                None
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.current_state()
            .map(|state| state.access_token)
            .filter(|token| !token.trim().is_empty())
    }

    pub async fn refresh(&self) -> Result<AuthSessionState, RefreshError> {
        let observed = self.completed.load(Ordering::SeqCst);
        let mut gate = self.gate.lock().await;

        // Another caller finished a refresh while we were waiting on the gate.
        if gate.completed != observed {
            if let Some(shared) = gate.last.clone() {
                tracing::debug!("joined in-flight auth refresh");
                return shared;
            }
        }

        let result = {
            let _flag = RefreshingFlag::raise(&self.refreshing);
            self.perform_refresh().await
        };

        gate.completed += 1;
        gate.last = Some(result.clone());
        self.completed.store(gate.completed, Ordering::SeqCst);
        result
    }

    async fn perform_refresh(&self) -> Result<AuthSessionState, RefreshError> {
        let current = self.current_state();
        tracing::debug!(has_session = current.is_some(), "refreshing auth session");

        match self.transport.refresh_session(current.as_ref()).await {
            Ok(next) => {
                self.store
                    .persist_auth_state(&next)
                    .map_err(|error| RefreshError::Store {
                        message: error.to_string(),
                    })?;
                tracing::info!("auth session refreshed");
                Ok(next)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(error = %message, "auth session refresh failed");
                if let Err(clear_error) = self.store.clear_auth_state() {
                    tracing::warn!(error = %clear_error, "failed to clear auth state");
                }
                Err(RefreshError::Transport { message })
            }
        }
    }

    /// Logs out remotely on a best-effort basis, then forgets the session.
    pub async fn sign_out(&self) -> Result<(), SignOutError> {
        if let Some(token) = self.access_token() {
            if let Err(error) = self.transport.logout(&token).await {
                tracing::warn!(error = %error, "remote logout failed");
            }
        }
        self.store
            .clear_auth_state()
            .map_err(|error| SignOutError::Store {
                message: error.to_string(),
            })
    }
}

#[async_trait]
impl<T, S> SessionRefresher for AuthSessionManager<T, S>
where
    T: AuthApiTransport + Send + Sync,
    T::Error: Display,
    S: AuthStateStore + Send + Sync,
    S::Error: Display,
{
    async fn refresh_session(&self) -> Result<(), String> {
        self.refresh()
            .await
            .map(|_| ())
            .map_err(|error| error.to_string())
    }
}

/// In-memory store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAuthStateStore {
    state: std::sync::Mutex<Option<AuthSessionState>>,
}

impl MemoryAuthStateStore {
    pub fn new(initial: Option<AuthSessionState>) -> Self {
        Self {
            state: std::sync::Mutex::new(initial),
        }
    }
}

impl AuthStateStore for MemoryAuthStateStore {
    type Error = std::convert::Infallible;

    fn load_auth_state(&self) -> Result<Option<AuthSessionState>, Self::Error> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state.clone())
    }

    fn persist_auth_state(&self, next: &AuthSessionState) -> Result<(), Self::Error> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = Some(next.clone());
        Ok(())
    }

    fn clear_auth_state(&self) -> Result<(), Self::Error> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = None;
        Ok(())
    }
}
