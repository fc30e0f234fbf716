//! Mount / unmount lifecycle for a [`SessionContext`].
//!
//! SYSTEM CONTEXT
//! ==============
//! [`mount`] is what a host calls once its shell is up. It kicks off store
//! rehydration and spawns three tasks:
//!
//! - the bootstrap orchestrator (once per mount);
//! - the tenant loader (once per mount, after the rehydrate delay);
//! - the token watcher, which arms the refresh scheduler whenever a new access
//!   token lands in the Credential Store, keeps the visibility handler seeded
//!   with it, and cancels both when the token disappears.
//!
//! DESIGN
//! ======
//! [`MountedSession::dispose`] is the single structured cleanup: it flips the
//! mount signal, stops the watcher (which disposes the visibility handler),
//! and cancels the refresh timer. In-flight orchestrator and loader calls are
//! left to finish; they observe the mount signal before writing.
//!
//! Scheduler callbacks hold a `Weak` context so an armed timer never keeps a
//! dropped session alive.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::host::Visibility;
use crate::refresh::{RefreshCallbacks, VisibilityHandle};
use crate::session::bootstrap::{BootstrapOrchestrator, BootstrapOutcome};
use crate::session::context::{MountSignal, SessionContext};
use crate::session::teardown::{TeardownReason, teardown};
use crate::session::tenant_loader::{LoaderOutcome, TenantLoader};
use crate::state::{SessionUser, TokenUpdate};

/// Start the session lifecycle for `ctx`.
#[must_use]
pub fn mount(ctx: Arc<SessionContext>, visibility: watch::Receiver<Visibility>) -> MountedSession {
    let signal = MountSignal::new();
    let orchestrator = Arc::new(BootstrapOrchestrator::new());
    let loader = Arc::new(TenantLoader::new());

    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if !ctx.credentials.is_hydrated() {
                ctx.credentials.rehydrate();
            }
            if !ctx.tenant.snapshot().initialized {
                ctx.tenant.rehydrate();
            }
            debug!("session stores rehydrated");
        });
    }

    let bootstrap = {
        let ctx = ctx.clone();
        let signal = signal.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(&ctx, &signal).await })
    };

    let tenant_loader = {
        let ctx = ctx.clone();
        let signal = signal.clone();
        let loader = loader.clone();
        tokio::spawn(async move { loader.run(&ctx, &signal).await })
    };

    let watcher = tokio::spawn(watch_tokens(Arc::downgrade(&ctx), visibility));

    info!("session mounted");
    MountedSession {
        ctx,
        signal,
        orchestrator,
        loader,
        bootstrap: Some(bootstrap),
        tenant_loader: Some(tenant_loader),
        watcher: Some(watcher),
    }
}

fn refresh_callbacks(ctx: &Weak<SessionContext>) -> RefreshCallbacks {
    let on_refreshed = ctx.clone();
    let on_expired = ctx.clone();
    RefreshCallbacks::new(
        move |access_token: String| {
            if let Some(ctx) = on_refreshed.upgrade() {
                ctx.credentials.update_tokens(
                    TokenUpdate::new()
                        .user(SessionUser::from_access_token(&access_token))
                        .access_token(access_token),
                );
            }
        },
        move || {
            if let Some(ctx) = on_expired.upgrade() {
                teardown(&ctx, TeardownReason::Expired);
            }
        },
    )
}

async fn watch_tokens(ctx: Weak<SessionContext>, visibility: watch::Receiver<Visibility>) {
    let Some(mut tokens) = ctx.upgrade().map(|c| c.credentials.subscribe()) else {
        return;
    };
    let callbacks = refresh_callbacks(&ctx);
    let mut current: Option<String> = None;
    let mut foreground: Option<VisibilityHandle> = None;

    loop {
        let token = tokens.borrow_and_update().credential.access_token.clone();
        let Some(session) = ctx.upgrade() else {
            return;
        };

        match token {
            Some(token) if current.as_deref() != Some(token.as_str()) => {
                if session.scheduler.armed_token().as_deref() != Some(token.as_str()) {
                    if let Err(e) = session.scheduler.init_token_refresh(&token, callbacks.clone()) {
                        warn!(error = %e, "access token expiry unreadable; proactive refresh disabled");
                    }
                }
                foreground = Some(
                    session
                        .scheduler
                        .setup_visibility_handler(&token, callbacks.clone(), visibility.clone()),
                );
                current = Some(token);
            }
            None if current.is_some() => {
                session.scheduler.clear_refresh_timer();
                foreground = None;
                current = None;
            }
            _ => {}
        }
        drop(session);

        if tokens.changed().await.is_err() {
            break;
        }
    }
    drop(foreground);
}

// =============================================================================
// MOUNTED SESSION
// =============================================================================

/// A live mount. Dropping it disposes the mount.
pub struct MountedSession {
    ctx: Arc<SessionContext>,
    signal: MountSignal,
    orchestrator: Arc<BootstrapOrchestrator>,
    loader: Arc<TenantLoader>,
    bootstrap: Option<JoinHandle<BootstrapOutcome>>,
    tenant_loader: Option<JoinHandle<LoaderOutcome>>,
    watcher: Option<JoinHandle<()>>,
}

impl MountedSession {
    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.signal.is_mounted()
    }

    /// Wait for the orchestrator and the loader to finish their first run.
    /// Returns `None` for a task already awaited or cancelled.
    pub async fn settled(&mut self) -> (Option<BootstrapOutcome>, Option<LoaderOutcome>) {
        let bootstrap = match self.bootstrap.take() {
            Some(task) => task.await.ok(),
            None => None,
        };
        let loader = match self.tenant_loader.take() {
            Some(task) => task.await.ok(),
            None => None,
        };
        (bootstrap, loader)
    }

    /// Re-invoke the bootstrap effect on this mount. Runs the sequence only if
    /// it has not run yet.
    pub async fn rerun_bootstrap(&self) -> BootstrapOutcome {
        self.orchestrator.run(&self.ctx, &self.signal).await
    }

    /// Re-invoke the tenant loader on this mount.
    pub async fn rerun_loader(&self) -> LoaderOutcome {
        self.loader.run(&self.ctx, &self.signal).await
    }

    /// Sign out: tear the session down and send the host to the login page.
    pub fn logout(&self) {
        teardown(&self.ctx, TeardownReason::Logout);
    }

    /// Cancel the watcher, the visibility subscription, and the refresh timer.
    /// Idempotent.
    pub fn dispose(&mut self) {
        if !self.signal.unmount() {
            return;
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.ctx.scheduler.clear_refresh_timer();
        info!("session unmounted");
    }
}

impl Drop for MountedSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
