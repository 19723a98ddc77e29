//! Proactive access-token refresh.
//!
//! One timer at most. Arming always aborts the previous timer, and a timer
//! that lost a race with a newer arm notices through the epoch check and
//! exits without refreshing.

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::action::SessionRefresher;
use crate::auth::{AuthApiTransport, AuthStateStore};
use crate::session::AuthSessionManager;
use crate::token;

/// Floor for the timer armed right after a scheduled refresh, so tokens that
/// live shorter than the refresh lead do not refresh back to back.
pub const MIN_REARM_DELAY: Duration = Duration::from_secs(30);

/// Read access to the token the scheduler should track.
pub trait AccessTokenSource: Send + Sync {
    fn current_access_token(&self) -> Option<String>;
}

impl<T, S> AccessTokenSource for AuthSessionManager<T, S>
where
    T: AuthApiTransport + Send + Sync,
    T::Error: Display,
    S: AuthStateStore + Send + Sync,
    S::Error: Display,
{
    fn current_access_token(&self) -> Option<String> {
        self.access_token()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled { delay: Duration },
    Refreshing,
}

struct SchedulerSlot {
    state: SchedulerState,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct SchedulerInner<M: ?Sized> {
    session: Arc<M>,
    slot: Mutex<SchedulerSlot>,
}

impl<M: ?Sized> SchedulerInner<M> {
    fn slot(&self) -> MutexGuard<'_, SchedulerSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct TokenRefreshScheduler<M: ?Sized> {
    inner: Arc<SchedulerInner<M>>,
}

impl<M> TokenRefreshScheduler<M>
where
    M: AccessTokenSource + SessionRefresher + ?Sized + 'static,
{
    pub fn new(session: Arc<M>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                session,
                slot: Mutex::new(SchedulerSlot {
                    state: SchedulerState::Idle,
                    epoch: 0,
                    timer: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.slot().state
    }

    /// Arms the timer from the current token, replacing any pending timer.
    /// Call again whenever the token may have changed outside the scheduler
    /// (e.g. the window regained focus). A no-op while a refresh is running.
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self) -> SchedulerState {
        arm(&self.inner)
    }

    pub fn cancel(&self) {
        let mut slot = self.inner.slot();
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.state = SchedulerState::Idle;
    }
}

impl<M: ?Sized> Drop for TokenRefreshScheduler<M> {
    fn drop(&mut self) {
        let mut slot = self.inner.slot();
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
    }
}

fn arm<M>(inner: &Arc<SchedulerInner<M>>) -> SchedulerState
where
    M: AccessTokenSource + SessionRefresher + ?Sized + 'static,
{
    let mut slot = inner.slot();
    if slot.state == SchedulerState::Refreshing {
        return slot.state;
    }
    arm_locked(inner, &mut slot, Duration::ZERO)
}

/// Replaces the timer while the caller holds the slot, so a concurrent
/// `cancel` or drop either happens before (and is seen through the epoch) or
/// after (and aborts the new timer).
fn arm_locked<M>(
    inner: &Arc<SchedulerInner<M>>,
    slot: &mut SchedulerSlot,
    min_delay: Duration,
) -> SchedulerState
where
    M: AccessTokenSource + SessionRefresher + ?Sized + 'static,
{
    slot.epoch += 1;
    if let Some(timer) = slot.timer.take() {
        timer.abort();
    }

    let delay = inner
        .session
        .current_access_token()
        .and_then(|access_token| token::refresh_delay(&access_token, token::now_unix()));

    let Some(mut delay) = delay else {
        tracing::debug!("no token with a valid expiry; refresh timer idle");
        slot.state = SchedulerState::Idle;
        return slot.state;
    };
    if delay < min_delay {
        tracing::warn!(
            delay_secs = delay.as_secs(),
            min_delay_secs = min_delay.as_secs(),
            "refreshed token already inside the refresh window; backing off"
        );
        delay = min_delay;
    }

    tracing::info!(delay_secs = delay.as_secs(), "token refresh scheduled");
    let epoch = slot.epoch;
    let task_inner = Arc::clone(inner);
    slot.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fire(task_inner, epoch).await;
    }));
    slot.state = SchedulerState::Scheduled { delay };
    slot.state
}

async fn fire<M>(inner: Arc<SchedulerInner<M>>, epoch: u64)
where
    M: AccessTokenSource + SessionRefresher + ?Sized + 'static,
{
    {
        let mut slot = inner.slot();
        if slot.epoch != epoch {
            return;
        }
        // Detach our own handle so re-arming below does not abort this task.
        slot.timer = None;
        slot.state = SchedulerState::Refreshing;
    }

    let outcome = inner.session.refresh_session().await;

    let mut slot = inner.slot();
    if slot.epoch != epoch {
        return;
    }
    slot.state = SchedulerState::Idle;
    match outcome {
        Ok(()) => {
            arm_locked(&inner, &mut slot, MIN_REARM_DELAY);
        }
        Err(error) => {
            tracing::warn!(error = %error, "scheduled token refresh failed; timer idle");
        }
    }
}
