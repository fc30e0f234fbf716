//! Credential Store: the process-wide authenticated identity.
//!
//! SYSTEM CONTEXT
//! ==============
//! Read by the bootstrap orchestrator, tenant loader, and token watcher;
//! written only through the mutators below. Every mutation is written through
//! to local storage so a reload can rehydrate the same tuple.
//!
//! DESIGN
//! ======
//! State lives in a `watch` channel so observers can wait for rehydration or
//! react to a new access token without polling. `role` is normalized to upper
//! case on every write path, including rehydration.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged at `debug`/`warn` and otherwise ignored; the
//! in-memory state is always authoritative.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::StorageKeys;
use crate::storage::{KeyValueStorage, load_json, save_json};
use crate::token;

// =============================================================================
// MODEL
// =============================================================================

/// The authenticated subject as far as the client knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Option<String>,
    pub email: Option<String>,
}

impl SessionUser {
    /// Derive the user from an access token's `sub`/`email` claims.
    /// Opaque tokens yield an anonymous subject.
    #[must_use]
    pub fn from_access_token(access_token: &str) -> Self {
        match token::decode_claims(access_token) {
            Ok(claims) => Self { id: claims.sub, email: claims.email },
            Err(_) => Self::default(),
        }
    }
}

/// One tenant the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub tenant_id: String,
    #[serde(default)]
    pub account_code: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// The persisted credential tuple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credential {
    pub user: Option<SessionUser>,
    pub role: Option<String>,
    pub tenant_id: Option<String>,
    pub account_code: Option<String>,
    pub memberships: Vec<Membership>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    pub credential: Credential,
    /// Set once rehydration from local storage has run (successfully or not).
    pub hydrated: bool,
}

/// Wholesale replacement payload for [`CredentialStore::set_auth`].
/// Omitted fields become `None`/empty.
#[derive(Debug, Clone, Default)]
pub struct AuthPayload {
    pub user: Option<SessionUser>,
    pub role: Option<String>,
    pub tenant_id: Option<String>,
    pub account_code: Option<String>,
    pub memberships: Option<Vec<Membership>>,
    pub access_token: Option<String>,
}

/// Partial merge for [`CredentialStore::update_tokens`]. Only supplied fields
/// change; `tenant_id(None)` explicitly clears the tenant.
#[derive(Debug, Clone, Default)]
pub struct TokenUpdate {
    user: Option<SessionUser>,
    access_token: Option<String>,
    role: Option<String>,
    tenant_id: Option<Option<String>>,
    account_code: Option<Option<String>>,
    memberships: Option<Vec<Membership>>,
}

impl TokenUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user(mut self, user: SessionUser) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn account_code(mut self, account_code: Option<String>) -> Self {
        self.account_code = Some(account_code);
        self
    }

    #[must_use]
    pub fn memberships(mut self, memberships: Vec<Membership>) -> Self {
        self.memberships = Some(memberships);
        self
    }
}

/// Canonical role casing: trimmed, upper case, empty treated as absent.
#[must_use]
pub fn normalize_role(role: Option<String>) -> Option<String> {
    role.map(|r| r.trim().to_uppercase()).filter(|r| !r.is_empty())
}

// =============================================================================
// REFRESH CREDENTIAL SLOT
// =============================================================================

/// The single session-scoped slot holding the raw refresh credential.
#[derive(Clone)]
pub struct RefreshCredentialSlot {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl RefreshCredentialSlot {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self { storage, key: key.into() }
    }

    /// The stored refresh credential; unreadable storage reads as absent.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        match self.storage.get_item(&self.key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                debug!(error = %e, "refresh credential unreadable");
                None
            }
        }
    }

    /// Returns whether the write reached storage.
    pub fn store(&self, refresh_token: &str) -> bool {
        match self.storage.set_item(&self.key, refresh_token) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "refresh credential not persisted");
                false
            }
        }
    }

    pub fn remove(&self) {
        if let Err(e) = self.storage.remove_item(&self.key) {
            debug!(error = %e, "refresh credential removal failed");
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct CredentialStore {
    state: Arc<watch::Sender<CredentialState>>,
    local: Arc<dyn KeyValueStorage>,
    key: String,
    refresh: RefreshCredentialSlot,
}

impl CredentialStore {
    #[must_use]
    pub fn new(local: Arc<dyn KeyValueStorage>, session: Arc<dyn KeyValueStorage>, keys: &StorageKeys) -> Self {
        let (tx, _rx) = watch::channel(CredentialState::default());
        Self {
            state: Arc::new(tx),
            local,
            key: keys.auth.clone(),
            refresh: RefreshCredentialSlot::new(session, keys.refresh_token.clone()),
        }
    }

    /// Restore the persisted tuple. Always marks the store hydrated, even when
    /// the blob is missing or unreadable.
    pub fn rehydrate(&self) {
        let restored = match load_json::<Credential>(self.local.as_ref(), &self.key) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "credential rehydration failed; starting empty");
                None
            }
        };
        self.state.send_modify(|state| {
            if let Some(mut credential) = restored {
                credential.role = normalize_role(credential.role.take());
                state.credential = credential;
            }
            state.hydrated = true;
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CredentialState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> Credential {
        self.state.borrow().credential.clone()
    }

    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.state.borrow().hydrated
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().credential.access_token.clone()
    }

    #[must_use]
    pub fn refresh_slot(&self) -> &RefreshCredentialSlot {
        &self.refresh
    }

    /// Replace the whole tuple from `payload`.
    pub fn set_auth(&self, payload: AuthPayload) {
        let credential = Credential {
            user: payload.user,
            role: normalize_role(payload.role),
            tenant_id: payload.tenant_id,
            account_code: payload.account_code,
            memberships: payload.memberships.unwrap_or_default(),
            access_token: payload.access_token,
        };
        self.state.send_modify(|state| state.credential = credential);
        self.persist();
    }

    /// Merge only the supplied fields.
    pub fn update_tokens(&self, update: TokenUpdate) {
        self.state.send_modify(|state| {
            let credential = &mut state.credential;
            if let Some(user) = update.user {
                credential.user = Some(user);
            }
            if let Some(access_token) = update.access_token {
                credential.access_token = Some(access_token);
            }
            if let Some(role) = normalize_role(update.role) {
                credential.role = Some(role);
            }
            if let Some(tenant_id) = update.tenant_id {
                credential.tenant_id = tenant_id;
            }
            if let Some(account_code) = update.account_code {
                credential.account_code = account_code;
            }
            if let Some(memberships) = update.memberships {
                credential.memberships = memberships;
            }
        });
        self.persist();
    }

    /// Reset to the initial state and drop the persisted blob and refresh
    /// credential. Idempotent; storage failures are ignored.
    pub fn clear_auth(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.credential != Credential::default();
            state.credential = Credential::default();
            changed
        });
        if let Err(e) = self.local.remove_item(&self.key) {
            debug!(error = %e, "persisted credential removal failed");
        }
        self.refresh.remove();
    }

    /// Case-insensitive role test; `false` when no role is set.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.has_any_role(&[role])
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        let state = self.state.borrow();
        let Some(current) = state.credential.role.as_deref() else {
            return false;
        };
        roles.iter().any(|r| r.trim().eq_ignore_ascii_case(current))
    }

    /// A user object is present. Token freshness is the server's concern.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().credential.user.is_some()
    }

    fn persist(&self) {
        let credential = self.snapshot();
        if let Err(e) = save_json(self.local.as_ref(), &self.key, &credential) {
            debug!(error = %e, "credential persist failed; continuing in memory");
        }
    }
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
