//! Tenant Bootstrap Loader: a delayed, load-once tenant fetch.
//!
//! SYSTEM CONTEXT
//! ==============
//! Spawned on every mount next to the bootstrap orchestrator. It sleeps for
//! `rehydrate_delay` so persisted state has landed, then fetches the tenant
//! only when it is genuinely missing.
//!
//! DESIGN
//! ======
//! Decision order after the delay: tenant resolved, credential already carries
//! both tenant identifiers, a fetch holds the latch, no user. Any match is a
//! no-op; otherwise [`fetch_and_apply`] runs once.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::session::context::{MountSignal, SessionContext};
use crate::session::tenant_fetch::{TenantFetchOutcome, fetch_and_apply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderOutcome {
    AlreadyRan,
    AlreadyResolved,
    CredentialHasTenant,
    FetchInFlight,
    Unauthenticated,
    Fetched(TenantFetchOutcome),
    Unmounted,
}

#[derive(Debug, Default)]
pub struct TenantLoader {
    loaded: AtomicBool,
}

impl TenantLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(&self, ctx: &SessionContext, mount: &MountSignal) -> LoaderOutcome {
        if self.loaded.swap(true, Ordering::AcqRel) {
            return LoaderOutcome::AlreadyRan;
        }

        tokio::time::sleep(ctx.config.rehydrate_delay).await;
        if !mount.is_mounted() {
            return LoaderOutcome::Unmounted;
        }

        let outcome = match decide(ctx) {
            Some(skip) => skip,
            None => LoaderOutcome::Fetched(fetch_and_apply(ctx, mount).await),
        };
        debug!(?outcome, "tenant loader finished");
        outcome
    }
}

fn decide(ctx: &SessionContext) -> Option<LoaderOutcome> {
    if ctx.tenant.is_resolved() {
        return Some(LoaderOutcome::AlreadyResolved);
    }
    let credential = ctx.credentials.snapshot();
    if credential.tenant_id.is_some() && credential.account_code.is_some() {
        return Some(LoaderOutcome::CredentialHasTenant);
    }
    if ctx.tenant.is_loading() {
        return Some(LoaderOutcome::FetchInFlight);
    }
    if !ctx.credentials.is_authenticated() {
        return Some(LoaderOutcome::Unauthenticated);
    }
    None
}

#[cfg(test)]
#[path = "tenant_loader_test.rs"]
mod tests;
