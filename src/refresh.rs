//! Refresh Scheduler: renews the access token ahead of expiry.
//!
//! SYSTEM CONTEXT
//! ==============
//! Armed by the session runtime whenever a new access token lands in the
//! Credential Store; cancelled on logout, on unauthenticated state, and on
//! unmount. It never touches the stores directly: results flow out through
//! the injected [`RefreshCallbacks`].
//!
//! DESIGN
//! ======
//! `Idle -> Armed -> Firing -> (Armed | Expired)`. At most one timer task is
//! live; arming aborts the previous one and bumps a generation counter so a
//! superseded refresh can tell its result is stale. Timer and visibility
//! triggers share one `in_flight` latch, so concurrent triggers coalesce into
//! a single provider call.
//!
//! ERROR HANDLING
//! ==============
//! Any refresh failure is terminal for the token: `on_expired` fires and the
//! scheduler parks in `Expired` without retrying.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RefreshWindow;
use crate::error::{ProviderError, TokenError};
use crate::host::Visibility;
use crate::token;

/// The refresh primitive. Implementations know where the refresh credential
/// lives; the scheduler only asks for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the refresh is rejected or fails.
    async fn refresh(&self) -> Result<String, ProviderError>;
}

type OnRefreshed = Arc<dyn Fn(String) + Send + Sync>;
type OnExpired = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct RefreshCallbacks {
    on_refreshed: OnRefreshed,
    on_expired: OnExpired,
}

impl RefreshCallbacks {
    pub fn new<R, E>(on_refreshed: R, on_expired: E) -> Self
    where
        R: Fn(String) + Send + Sync + 'static,
        E: Fn() + Send + Sync + 'static,
    {
        Self { on_refreshed: Arc::new(on_refreshed), on_expired: Arc::new(on_expired) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
    Firing,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Visibility,
}

/// What a trigger ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Refreshed,
    Expired,
    /// Another refresh was already in flight.
    Coalesced,
    /// The scheduler was re-armed or cancelled while this trigger was pending.
    Stale,
    /// Nothing to do (token outside its lead window, or scheduler parked).
    Skipped,
}

struct Inner {
    state: SchedulerState,
    generation: u64,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
    callbacks: Option<RefreshCallbacks>,
    access_token: Option<String>,
    expires_at: Option<u64>,
    lead: Duration,
}

struct Shared {
    refresher: Arc<dyn TokenRefresher>,
    window: RefreshWindow,
    inner: Mutex<Inner>,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    shared: Arc<Shared>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(refresher: Arc<dyn TokenRefresher>, window: RefreshWindow) -> Self {
        Self {
            shared: Arc::new(Shared {
                refresher,
                window,
                inner: Mutex::new(Inner {
                    state: SchedulerState::Idle,
                    generation: 0,
                    in_flight: false,
                    timer: None,
                    callbacks: None,
                    access_token: None,
                    expires_at: None,
                    lead: window.lead,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    /// The token the scheduler is currently armed for.
    #[must_use]
    pub fn armed_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    fn pick_lead(&self) -> Duration {
        let jitter = self.shared.window.jitter.as_secs();
        let extra = if jitter == 0 { 0 } else { rand::rng().random_range(0..=jitter) };
        self.shared.window.lead + Duration::from_secs(extra)
    }

    /// Arm exactly one timer for `access_token`, superseding any prior one.
    /// Returns the delay until the timer fires.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token carries no readable expiry; the
    /// scheduler is left `Idle` with no timer.
    pub fn init_token_refresh(&self, access_token: &str, callbacks: RefreshCallbacks) -> Result<Duration, TokenError> {
        match token::expires_at(access_token) {
            Ok(expires_at) => Ok(self.arm(access_token, expires_at, callbacks)),
            Err(e) => {
                self.clear_refresh_timer();
                Err(e)
            }
        }
    }

    fn arm(&self, access_token: &str, expires_at: u64, callbacks: RefreshCallbacks) -> Duration {
        let lead = self.pick_lead();
        let delay = token::fire_delay(expires_at, token::now_unix(), lead);

        let mut inner = self.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.state = SchedulerState::Armed;
        inner.callbacks = Some(callbacks);
        inner.access_token = Some(access_token.to_owned());
        inner.expires_at = Some(expires_at);
        inner.lead = lead;

        let this = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(Trigger::Timer, Some(generation), None).await;
        }));

        info!(delay_secs = delay.as_secs(), lead_secs = lead.as_secs(), "token refresh armed");
        delay
    }

    /// Cancel any pending timer. Idempotent. An in-flight refresh is not
    /// aborted, but its result is discarded.
    pub fn clear_refresh_timer(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
            debug!("token refresh timer cancelled");
        }
        inner.generation += 1;
        inner.callbacks = None;
        inner.access_token = None;
        inner.expires_at = None;
        if inner.state != SchedulerState::Expired {
            inner.state = SchedulerState::Idle;
        }
    }

    /// Run the refresh path now if the current token is inside its lead window.
    pub async fn check_and_refresh(&self, fallback_expiry: Option<u64>, callbacks: &RefreshCallbacks) -> FireOutcome {
        let (state, expires_at, lead) = {
            let inner = self.lock();
            (inner.state, inner.expires_at.or(fallback_expiry), inner.lead)
        };
        if state == SchedulerState::Expired {
            return FireOutcome::Skipped;
        }
        let Some(expires_at) = expires_at else {
            return FireOutcome::Skipped;
        };
        if !token::within_lead_window(expires_at, token::now_unix(), lead) {
            return FireOutcome::Skipped;
        }
        self.fire(Trigger::Visibility, None, Some(callbacks.clone())).await
    }

    async fn fire(
        &self,
        trigger: Trigger,
        expected_generation: Option<u64>,
        fallback: Option<RefreshCallbacks>,
    ) -> FireOutcome {
        let (generation, callbacks) = {
            let mut inner = self.lock();
            if expected_generation.is_some_and(|g| g != inner.generation) {
                return FireOutcome::Stale;
            }
            if inner.in_flight {
                debug!(?trigger, "refresh already in flight; coalesced");
                return FireOutcome::Coalesced;
            }
            let Some(callbacks) = inner.callbacks.clone().or(fallback) else {
                return FireOutcome::Skipped;
            };
            match trigger {
                // This is the timer task itself; dropping the handle detaches it.
                Trigger::Timer => drop(inner.timer.take()),
                Trigger::Visibility => {
                    if let Some(timer) = inner.timer.take() {
                        timer.abort();
                    }
                }
            }
            inner.in_flight = true;
            inner.state = SchedulerState::Firing;
            (inner.generation, callbacks)
        };

        debug!(?trigger, "refreshing access token");
        let result = self.shared.refresher.refresh().await;

        let current = {
            let mut inner = self.lock();
            inner.in_flight = false;
            inner.generation == generation
        };
        if !current {
            debug!(?trigger, "refresh result discarded; scheduler changed while in flight");
            return FireOutcome::Stale;
        }

        match result {
            Ok(new_token) => {
                match token::expires_at(&new_token) {
                    Ok(expires_at) => {
                        self.arm(&new_token, expires_at, callbacks.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "refreshed token has no readable expiry; not re-arming");
                        let mut inner = self.lock();
                        inner.state = SchedulerState::Idle;
                        inner.access_token = Some(new_token.clone());
                        inner.expires_at = None;
                    }
                }
                (callbacks.on_refreshed)(new_token);
                FireOutcome::Refreshed
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed; session expired");
                {
                    let mut inner = self.lock();
                    inner.state = SchedulerState::Expired;
                    inner.callbacks = None;
                    inner.access_token = None;
                    inner.expires_at = None;
                }
                (callbacks.on_expired)();
                FireOutcome::Expired
            }
        }
    }

    /// Re-check the token whenever the tab returns to the foreground.
    /// `access_token` seeds the expiry when the scheduler is not armed.
    #[must_use]
    pub fn setup_visibility_handler(
        &self,
        access_token: &str,
        callbacks: RefreshCallbacks,
        mut signal: watch::Receiver<Visibility>,
    ) -> VisibilityHandle {
        let fallback_expiry = token::expires_at(access_token).ok();
        let this = self.clone();
        let task = tokio::spawn(async move {
            drop(signal.borrow_and_update());
            while signal.changed().await.is_ok() {
                if *signal.borrow_and_update() != Visibility::Visible {
                    continue;
                }
                let outcome = this.check_and_refresh(fallback_expiry, &callbacks).await;
                debug!(?outcome, "foreground token check");
            }
        });
        VisibilityHandle { task: Some(task) }
    }
}

/// Disposer for a visibility subscription. Dropping it also unsubscribes.
pub struct VisibilityHandle {
    task: Option<JoinHandle<()>>,
}

impl VisibilityHandle {
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for VisibilityHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
