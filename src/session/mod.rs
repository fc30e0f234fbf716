//! Session lifecycle coordination.
//!
//! SYSTEM CONTEXT
//! ==============
//! Everything here operates on an explicitly-owned [`SessionContext`]: the two
//! stores, the refresh scheduler, and the injected collaborators. A host
//! mounts the context with [`runtime::mount`], which rehydrates the stores and
//! spawns the bootstrap orchestrator, the tenant loader, and the token
//! watcher.
//!
//! DESIGN
//! ======
//! - `bootstrap`: the once-per-mount OAuth callback / gap-fill / refresh
//!   sequence.
//! - `tenant_loader`: the delayed, load-once tenant fetch.
//! - `tenant_fetch`: the single fetch path both of the above share, latched by
//!   the Tenant Store's `is_loading` flag.
//! - `teardown`: the one idempotent way to end a session.

pub mod bootstrap;
pub mod context;
pub mod runtime;
pub mod teardown;
pub mod tenant_fetch;
pub mod tenant_loader;

pub use bootstrap::{BootstrapOrchestrator, BootstrapOutcome, BootstrapPhase};
pub use context::{Collaborators, MountSignal, SessionContext, SessionEpoch};
pub use runtime::{MountedSession, mount};
pub use teardown::{TeardownReason, teardown};
pub use tenant_fetch::{TenantFetchOutcome, fetch_and_apply};
pub use tenant_loader::{LoaderOutcome, TenantLoader};

#[cfg(test)]
pub(crate) mod fakes;
