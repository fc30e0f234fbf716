//! Bootstrap Orchestrator: the once-per-mount session establishment sequence.
//!
//! SYSTEM CONTEXT
//! ==============
//! Spawned by [`crate::session::mount`] alongside the tenant loader. It waits
//! for the Credential Store to rehydrate, then runs the first matching step:
//!
//! 1. the location carries an authorization code: exchange it, store the
//!    refresh credential, fetch the tenant, and strip the code from the URL;
//! 2. an access token exists but no tenant id: fetch the tenant;
//! 3. no access token but a stored refresh credential: exchange it, then fetch
//!    the tenant.
//!
//! If none applies, nothing touches the network.
//!
//! DESIGN
//! ======
//! Re-entry is blocked by an explicit `NotStarted | Running | Done` phase,
//! advanced with a compare-and-swap before any work starts. Tenant fetches go
//! through [`fetch_and_apply`], so they are latched against the loader.
//!
//! ERROR HANDLING
//! ==============
//! A failed code exchange or tenant fetch is logged and absorbed. A rejected
//! refresh credential tears the session down, so a stale credential is never
//! retried.
//!
//! Each exchange captures the session epoch first. If a teardown lands while
//! the exchange is in flight, its result (success or rejection) is dropped so
//! a logout is never undone and a newer session is never torn down.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info, warn};

use crate::host::{authorization_code, without_authorization_code};
use crate::session::context::{MountSignal, SessionContext};
use crate::session::teardown::{TeardownReason, teardown};
use crate::session::tenant_fetch::{TenantFetchOutcome, fetch_and_apply};
use crate::state::{SessionUser, TokenUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    Running,
    Done,
}

impl BootstrapPhase {
    const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Running => 1,
            Self::Done => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Running,
            _ => Self::Done,
        }
    }
}

/// Which step ran and how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The sequence already ran (or is running) on this mount.
    AlreadyAttempted,
    /// Step 1 succeeded; carries the tenant fetch result.
    CodeExchanged(TenantFetchOutcome),
    /// Step 1's exchange was refused; the session is unchanged.
    CodeRejected,
    /// Step 2 ran.
    TenantGapFilled(TenantFetchOutcome),
    /// Step 3 succeeded; carries the tenant fetch result.
    RefreshExchanged(TenantFetchOutcome),
    /// Step 3's exchange was refused and the session torn down.
    RefreshRejected,
    /// No precondition held; no network calls were made.
    Idle,
    /// The mount went away while an exchange was in flight.
    Unmounted,
    /// The session was torn down while an exchange was in flight.
    Superseded,
}

#[derive(Debug)]
pub struct BootstrapOrchestrator {
    phase: AtomicU8,
}

impl BootstrapOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self { phase: AtomicU8::new(BootstrapPhase::NotStarted.as_u8()) }
    }

    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        BootstrapPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Run the sequence if this is the first call on this orchestrator.
    pub async fn run(&self, ctx: &SessionContext, mount: &MountSignal) -> BootstrapOutcome {
        let started = self.phase.compare_exchange(
            BootstrapPhase::NotStarted.as_u8(),
            BootstrapPhase::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if started.is_err() {
            return BootstrapOutcome::AlreadyAttempted;
        }

        let outcome = sequence(ctx, mount).await;
        self.phase.store(BootstrapPhase::Done.as_u8(), Ordering::Release);
        info!(?outcome, "session bootstrap finished");
        outcome
    }
}

impl Default for BootstrapOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

async fn sequence(ctx: &SessionContext, mount: &MountSignal) -> BootstrapOutcome {
    let mut hydration = ctx.credentials.subscribe();
    if hydration.wait_for(|state| state.hydrated).await.is_err() {
        return BootstrapOutcome::Unmounted;
    }

    let location = ctx.location.current();
    if let Some(code) = authorization_code(&location) {
        return exchange_code(ctx, mount, &code).await;
    }

    let credential = ctx.credentials.snapshot();
    if credential.access_token.is_some() {
        if credential.tenant_id.is_none() {
            return BootstrapOutcome::TenantGapFilled(fetch_and_apply(ctx, mount).await);
        }
        return BootstrapOutcome::Idle;
    }

    if ctx.credentials.refresh_slot().get().is_some() {
        return exchange_refresh_credential(ctx, mount).await;
    }

    BootstrapOutcome::Idle
}

async fn exchange_code(ctx: &SessionContext, mount: &MountSignal, code: &str) -> BootstrapOutcome {
    let epoch = ctx.epoch.current();
    let result = ctx.identity.handle_callback(code).await;

    // Codes are single-use: strip it on every outcome.
    ctx.location.replace(without_authorization_code(&ctx.location.current()));

    let session = match result {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "authorization code exchange failed");
            return BootstrapOutcome::CodeRejected;
        }
    };
    if !mount.is_mounted() {
        return BootstrapOutcome::Unmounted;
    }
    if !ctx.epoch.is_current(epoch) {
        return BootstrapOutcome::Superseded;
    }

    apply_access_token(ctx, &session.access_token, None);
    if let Some(refresh_token) = session.refresh_token.as_deref() {
        ctx.credentials.refresh_slot().store(refresh_token);
    }
    info!("authorization code exchanged");

    BootstrapOutcome::CodeExchanged(fetch_and_apply(ctx, mount).await)
}

async fn exchange_refresh_credential(ctx: &SessionContext, mount: &MountSignal) -> BootstrapOutcome {
    let epoch = ctx.epoch.current();
    let result = ctx.refresher.exchange().await;
    if !ctx.epoch.is_current(epoch) {
        debug!("session torn down during refresh exchange; result dropped");
        return BootstrapOutcome::Superseded;
    }

    match result {
        Ok(refreshed) => {
            if !mount.is_mounted() {
                return BootstrapOutcome::Unmounted;
            }
            apply_access_token(ctx, &refreshed.access_token, refreshed.role);
            info!("session restored from refresh credential");
            BootstrapOutcome::RefreshExchanged(fetch_and_apply(ctx, mount).await)
        }
        Err(e) => {
            warn!(error = %e, "refresh credential rejected; clearing session");
            teardown(ctx, TeardownReason::RefreshRejected);
            BootstrapOutcome::RefreshRejected
        }
    }
}

/// Merge a freshly exchanged token. The tenant is deferred until the
/// tenant-config fetch establishes it.
fn apply_access_token(ctx: &SessionContext, access_token: &str, role: Option<String>) {
    let mut update = TokenUpdate::new()
        .user(SessionUser::from_access_token(access_token))
        .access_token(access_token)
        .tenant_id(None);
    if let Some(role) = role {
        update = update.role(role);
    }
    ctx.credentials.update_tokens(update);
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
