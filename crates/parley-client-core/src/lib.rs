pub mod action;
pub mod auth;
pub mod scheduler;
pub mod session;
pub mod token;

pub use action::{
    AuthRetryPolicy, LoginNavigator, SESSION_EXPIRED_MESSAGE, ServerActionResult,
    SessionRefresher, UNAUTHORIZED_SENTINEL,
};
pub use auth::{
    AuthApiTransport, AuthInputError, AuthSessionState, AuthStateStore, login_url,
    normalize_base_url, resolve_api_base_url,
};
pub use scheduler::{AccessTokenSource, MIN_REARM_DELAY, SchedulerState, TokenRefreshScheduler};
pub use session::{AuthSessionManager, MemoryAuthStateStore, RefreshError, SignOutError};
