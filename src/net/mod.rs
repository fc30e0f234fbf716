//! Remote collaborators.
//!
//! SYSTEM CONTEXT
//! ==============
//! `identity` exchanges authorization codes and refresh credentials with the
//! identity provider; `tenant_api` resolves tenant configuration from an
//! access token. Both are traits so the orchestration layer can be driven by
//! in-memory fakes.

pub mod identity;
pub mod tenant_api;

pub use identity::{HttpIdentityProvider, IdentityProvider, ProviderSession, RefreshedSession};
pub use tenant_api::{HttpTenantApi, ResolvedTenant, TenantApi, TenantConfigResponse};
