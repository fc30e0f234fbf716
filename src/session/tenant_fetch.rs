//! The one tenant-config fetch path shared by the orchestrator and the loader.
//!
//! DESIGN
//! ======
//! The fetch is latched by [`TenantStore::begin_loading`]; whichever caller
//! raises `is_loading` first does the fetch and the other backs off. The
//! guard is held across the remote call and dropped on every exit path.
//!
//! The session epoch is captured before the call. A response that lands after
//! teardown is discarded even if a new session has signed in since.
//!
//! ERROR HANDLING
//! ==============
//! Failure never propagates: it is logged and the tenant stays unresolved so
//! a later caller can retry.
//!
//! [`TenantStore::begin_loading`]: crate::state::TenantStore::begin_loading

use tracing::{debug, info, warn};

use crate::host::Cookie;
use crate::net::TenantConfigResponse;
use crate::session::context::{MountSignal, SessionContext};
use crate::state::TokenUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantFetchOutcome {
    /// Both stores were written and the tenant cookie set.
    Loaded,
    /// Another fetch held the `is_loading` latch.
    AlreadyLoading,
    /// No access token to authorize the request.
    Unauthenticated,
    /// The call failed; the tenant remains unresolved.
    Failed,
    /// The mount or the session ended while the call was in flight; the
    /// result was dropped.
    Discarded,
}

/// Fetch tenant config with the current access token and write it to both
/// stores.
pub async fn fetch_and_apply(ctx: &SessionContext, mount: &MountSignal) -> TenantFetchOutcome {
    let epoch = ctx.epoch.current();
    let Some(access_token) = ctx.credentials.access_token() else {
        return TenantFetchOutcome::Unauthenticated;
    };
    let Some(_loading) = ctx.tenant.begin_loading() else {
        return TenantFetchOutcome::AlreadyLoading;
    };

    let result = ctx
        .tenant_api
        .fetch_tenant_config(&access_token)
        .await
        .and_then(TenantConfigResponse::resolve);

    let resolved = match result {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "tenant config fetch failed; tenant left unresolved");
            return TenantFetchOutcome::Failed;
        }
    };

    let current = mount.is_mounted() && ctx.epoch.is_current(epoch);
    if !current || ctx.credentials.access_token().is_none() {
        debug!("tenant config response arrived after session change; discarded");
        return TenantFetchOutcome::Discarded;
    }

    let config = resolved.config;
    let mut update = TokenUpdate::new()
        .tenant_id(Some(config.record_id.clone()))
        .account_code(config.account_code.clone());
    if let Some(role) = resolved.role {
        update = update.role(role);
    }
    ctx.credentials.update_tokens(update);
    ctx.cookies
        .set_cookie(Cookie::new(ctx.config.keys.tenant_cookie.clone(), config.record_id.clone()));

    info!(
        tenant_id = %config.record_id,
        account_code = config.account_code.as_deref().unwrap_or(""),
        plan = ?config.plan,
        "tenant config loaded"
    );
    ctx.tenant.set_tenant(config);
    TenantFetchOutcome::Loaded
}

#[cfg(test)]
#[path = "tenant_fetch_test.rs"]
mod tests;
