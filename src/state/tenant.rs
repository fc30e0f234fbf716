//! Tenant Store: the resolved tenant configuration and its fetch latch.
//!
//! DESIGN
//! ======
//! `is_loading` is the mutual-exclusion signal between the bootstrap
//! orchestrator and the tenant loader. [`TenantStore::begin_loading`] is the
//! only sanctioned way to raise it: an atomic check-and-set whose guard lowers
//! the flag again on drop, so no exit path can leave it stuck.
//!
//! Each acquisition takes a fresh ticket. A guard lowers the flag only while
//! its ticket still owns the latch; [`TenantStore::clear`] revokes ownership,
//! so a fetch orphaned by teardown cannot release a later session's latch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::StorageKeys;
use crate::storage::{KeyValueStorage, load_json, save_json};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Business,
    Enterprise,
    #[serde(other)]
    Unknown,
}

impl Plan {
    /// Parse a plan label case-insensitively; unrecognized labels map to `Unknown`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "FREE" => Self::Free,
            "PRO" => Self::Pro,
            "BUSINESS" => Self::Business,
            "ENTERPRISE" => Self::Enterprise,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantConfig {
    pub record_id: String,
    pub account_code: Option<String>,
    pub slug: String,
    pub name: String,
    pub plan: Plan,
    pub settings: Map<String, Value>,
    pub theme: Map<String, Value>,
    pub feature_flags: Map<String, Value>,
}

impl TenantConfig {
    /// Both identifiers known; no further fetch is warranted.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.record_id.is_empty() && self.account_code.as_deref().is_some_and(|c| !c.is_empty())
    }

    #[must_use]
    pub fn feature_enabled(&self, flag: &str) -> bool {
        self.feature_flags.get(flag).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantState {
    pub tenant: Option<TenantConfig>,
    pub is_loading: bool,
    /// Set once rehydration from local storage has run.
    pub initialized: bool,
    /// Ticket of the guard that owns the raised latch.
    latch_ticket: u64,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedTenant {
    #[serde(default)]
    tenant: Option<TenantConfig>,
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct TenantStore {
    state: Arc<watch::Sender<TenantState>>,
    local: Arc<dyn KeyValueStorage>,
    key: String,
}

impl TenantStore {
    #[must_use]
    pub fn new(local: Arc<dyn KeyValueStorage>, keys: &StorageKeys) -> Self {
        let (tx, _rx) = watch::channel(TenantState::default());
        Self { state: Arc::new(tx), local, key: keys.tenant.clone() }
    }

    pub fn rehydrate(&self) {
        let restored = match load_json::<PersistedTenant>(self.local.as_ref(), &self.key) {
            Ok(found) => found.and_then(|p| p.tenant),
            Err(e) => {
                warn!(error = %e, "tenant rehydration failed; starting empty");
                None
            }
        };
        self.state.send_modify(|state| {
            if restored.is_some() {
                state.tenant = restored;
            }
            state.initialized = true;
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TenantState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> TenantState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn tenant(&self) -> Option<TenantConfig> {
        self.state.borrow().tenant.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.borrow().tenant.as_ref().is_some_and(TenantConfig::is_resolved)
    }

    /// Replace the tenant wholesale.
    pub fn set_tenant(&self, config: TenantConfig) {
        self.state.send_modify(|state| state.tenant = Some(config));
        self.persist();
    }

    /// Raw flag setter. Prefer [`TenantStore::begin_loading`], which pairs the
    /// raise with a guaranteed lower.
    pub fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_loading != loading;
            state.is_loading = loading;
            changed
        });
    }

    /// Raise `is_loading` if and only if it is currently lowered. Returns
    /// `None` when another fetch already holds the latch.
    #[must_use]
    pub fn begin_loading(&self) -> Option<LoadingGuard> {
        let mut ticket = None;
        self.state.send_if_modified(|state| {
            if state.is_loading {
                return false;
            }
            state.latch_ticket = state.latch_ticket.wrapping_add(1);
            state.is_loading = true;
            ticket = Some(state.latch_ticket);
            true
        });
        ticket.map(|ticket| LoadingGuard { store: self.clone(), ticket })
    }

    fn end_loading(&self, ticket: u64) {
        self.state.send_if_modified(|state| {
            if !state.is_loading || state.latch_ticket != ticket {
                return false;
            }
            state.is_loading = false;
            true
        });
    }

    /// Drop the tenant and its persisted blob, and revoke any held latch.
    /// Leaves `initialized` intact.
    pub fn clear(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.tenant.is_some() || state.is_loading;
            state.tenant = None;
            state.is_loading = false;
            state.latch_ticket = state.latch_ticket.wrapping_add(1);
            changed
        });
        if let Err(e) = self.local.remove_item(&self.key) {
            debug!(error = %e, "persisted tenant removal failed");
        }
    }

    fn persist(&self) {
        let persisted = PersistedTenant { tenant: self.tenant() };
        if let Err(e) = save_json(self.local.as_ref(), &self.key, &persisted) {
            debug!(error = %e, "tenant persist failed; continuing in memory");
        }
    }
}

/// Holds the tenant fetch latch; lowering `is_loading` on drop unless the
/// latch was revoked in the meantime.
#[must_use = "dropping the guard immediately releases the tenant fetch latch"]
pub struct LoadingGuard {
    store: TenantStore,
    ticket: u64,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.store.end_loading(self.ticket);
    }
}

#[cfg(test)]
#[path = "tenant_test.rs"]
mod tests;
