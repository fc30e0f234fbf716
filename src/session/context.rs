//! The application context object injected into every session component.
//!
//! SYSTEM CONTEXT
//! ==============
//! One [`SessionContext`] per process. It owns the Credential Store, the
//! Tenant Store, and the Refresh Scheduler, and holds the injected remote and
//! host collaborators. Components never reach for globals; they receive the
//! context and mutate state only through the stores' declared methods.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::ProviderError;
use crate::host::{CookieJar, Location};
use crate::net::{IdentityProvider, RefreshedSession, TenantApi};
use crate::refresh::{RefreshScheduler, TokenRefresher};
use crate::state::credentials::RefreshCredentialSlot;
use crate::state::{CredentialStore, TenantStore};
use crate::storage::KeyValueStorage;

/// Everything the session layer talks to but does not own.
pub struct Collaborators {
    /// Durable storage for the persisted store blobs.
    pub local: Arc<dyn KeyValueStorage>,
    /// Session-scoped storage for the raw refresh credential.
    pub session: Arc<dyn KeyValueStorage>,
    pub identity: Arc<dyn IdentityProvider>,
    pub tenant_api: Arc<dyn TenantApi>,
    pub location: Arc<dyn Location>,
    pub cookies: Arc<dyn CookieJar>,
}

pub struct SessionContext {
    pub config: SessionConfig,
    pub credentials: CredentialStore,
    pub tenant: TenantStore,
    pub scheduler: RefreshScheduler,
    pub identity: Arc<dyn IdentityProvider>,
    pub tenant_api: Arc<dyn TenantApi>,
    pub location: Arc<dyn Location>,
    pub cookies: Arc<dyn CookieJar>,
    pub epoch: SessionEpoch,
    pub(crate) refresher: Arc<ProviderRefresher>,
}

impl SessionContext {
    #[must_use]
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let credentials = CredentialStore::new(collaborators.local.clone(), collaborators.session, &config.keys);
        let tenant = TenantStore::new(collaborators.local, &config.keys);
        let epoch = SessionEpoch::default();
        let refresher = Arc::new(ProviderRefresher {
            identity: collaborators.identity.clone(),
            slot: credentials.refresh_slot().clone(),
            epoch: epoch.clone(),
        });
        let scheduler = RefreshScheduler::new(refresher.clone(), config.refresh);

        Self {
            config,
            credentials,
            tenant,
            scheduler,
            identity: collaborators.identity,
            tenant_api: collaborators.tenant_api,
            location: collaborators.location,
            cookies: collaborators.cookies,
            epoch,
            refresher,
        }
    }
}

// =============================================================================
// REFRESH PRIMITIVE
// =============================================================================

/// Exchanges the stored refresh credential with the identity provider,
/// rotating the stored credential when the provider issues a new one.
///
/// A rotation is skipped if the session ended while the call was in flight.
pub(crate) struct ProviderRefresher {
    identity: Arc<dyn IdentityProvider>,
    slot: RefreshCredentialSlot,
    epoch: SessionEpoch,
}

impl ProviderRefresher {
    pub(crate) async fn exchange(&self) -> Result<RefreshedSession, ProviderError> {
        let epoch = self.epoch.current();
        let refresh_token = self.slot.get().ok_or(ProviderError::MissingRefreshCredential)?;
        let refreshed = self.identity.refresh_session(&refresh_token).await?;
        if let Some(rotated) = refreshed.refresh_token.as_deref() {
            if self.epoch.is_current(epoch) {
                let persisted = self.slot.store(rotated);
                debug!(persisted, "refresh credential rotated");
            } else {
                debug!("session ended during refresh; rotated credential dropped");
            }
        }
        Ok(refreshed)
    }
}

#[async_trait]
impl TokenRefresher for ProviderRefresher {
    async fn refresh(&self) -> Result<String, ProviderError> {
        self.exchange().await.map(|refreshed| refreshed.access_token)
    }
}

// =============================================================================
// SESSION EPOCH
// =============================================================================

/// Counts session lifetimes. Teardown advances it; a remote-call completion
/// whose captured epoch is no longer current belongs to a session that has
/// already ended.
#[derive(Debug, Clone, Default)]
pub struct SessionEpoch {
    value: Arc<AtomicU64>,
}

impl SessionEpoch {
    #[must_use]
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_current(&self, seen: u64) -> bool {
        self.current() == seen
    }

    /// End the current session lifetime. Returns the new epoch.
    pub(crate) fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

// =============================================================================
// MOUNT SIGNAL
// =============================================================================

/// Shared liveness flag for one mount. Completions of in-flight remote calls
/// check it before touching the stores.
#[derive(Debug, Clone)]
pub struct MountSignal {
    mounted: Arc<AtomicBool>,
}

impl MountSignal {
    #[must_use]
    pub fn new() -> Self {
        Self { mounted: Arc::new(AtomicBool::new(true)) }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Returns whether this call performed the transition.
    pub fn unmount(&self) -> bool {
        self.mounted.swap(false, Ordering::AcqRel)
    }
}

impl Default for MountSignal {
    fn default() -> Self {
        Self::new()
    }
}
