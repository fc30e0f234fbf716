//! Process-wide session state containers.
//!
//! SYSTEM CONTEXT
//! ==============
//! `credentials` holds the authenticated identity and `tenant` holds the
//! resolved tenant configuration. Neither performs network I/O; both write
//! through to local storage and publish changes on a `watch` channel.

pub mod credentials;
pub mod tenant;

pub use credentials::{AuthPayload, Credential, CredentialStore, Membership, SessionUser, TokenUpdate};
pub use tenant::{LoadingGuard, Plan, TenantConfig, TenantStore};
