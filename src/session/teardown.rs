//! Session Teardown: the single way a session ends.
//!
//! Invoked by explicit logout, by terminal refresh expiry, and by a rejected
//! refresh credential during bootstrap. Every path ends on the login page.
//! Safe to call any number of times.
//!
//! Teardown advances the session epoch before clearing anything, so remote
//! calls still in flight for the old session discard their results.

use tracing::info;

use crate::session::context::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The user asked to sign out.
    Logout,
    /// The refresh scheduler could not renew the access token.
    Expired,
    /// The stored refresh credential was refused during bootstrap.
    RefreshRejected,
}

/// Cancel scheduled refreshes, clear both stores and all derived storage,
/// drop the tenant cookie, and send the host to the login page.
pub fn teardown(ctx: &SessionContext, reason: TeardownReason) {
    let epoch = ctx.epoch.advance();
    ctx.scheduler.clear_refresh_timer();
    ctx.credentials.clear_auth();
    ctx.tenant.clear();
    ctx.cookies.remove_cookie(&ctx.config.keys.tenant_cookie);
    info!(?reason, epoch, "session torn down");

    ctx.location.navigate(&ctx.config.login_path);
}

#[cfg(test)]
#[path = "teardown_test.rs"]
mod tests;
