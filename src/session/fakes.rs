//! In-memory collaborators shared by the session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use url::Url;

use crate::config::SessionConfig;
use crate::error::{ProviderError, TenantApiError};
use crate::host::{MemoryCookieJar, MemoryLocation};
use crate::net::{IdentityProvider, ProviderSession, RefreshedSession, TenantApi, TenantConfigResponse};
use crate::session::{Collaborators, SessionContext};
use crate::storage::MemoryStorage;
use crate::token;

pub(crate) fn jwt(sub: &str, expires_in: u64) -> String {
    token::test_jwt(&json!({
        "sub": sub,
        "email": format!("{sub}@example.com"),
        "exp": token::now_unix() + expires_in,
    }))
}

/// Holds every remote call at its await point until released.
#[derive(Default)]
struct Gate {
    notify: Mutex<Option<Arc<Notify>>>,
}

impl Gate {
    fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.notify.lock().unwrap() = Some(notify.clone());
        notify
    }

    async fn pass(&self) {
        let held = self.notify.lock().unwrap().clone();
        if let Some(notify) = held {
            notify.notified().await;
        }
    }
}

// =============================================================================
// Identity provider
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeIdentity {
    pub callbacks: Mutex<Vec<String>>,
    pub refreshes: Mutex<Vec<String>>,
    callback_results: Mutex<VecDeque<Result<ProviderSession, ProviderError>>>,
    refresh_results: Mutex<VecDeque<Result<RefreshedSession, ProviderError>>>,
    gate: Gate,
}

impl FakeIdentity {
    /// Park subsequent exchanges until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        self.gate.hold()
    }

    pub fn on_callback(&self, result: Result<ProviderSession, ProviderError>) {
        self.callback_results.lock().unwrap().push_back(result);
    }

    pub fn on_refresh(&self, result: Result<RefreshedSession, ProviderError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn handle_callback(&self, code: &str) -> Result<ProviderSession, ProviderError> {
        self.callbacks.lock().unwrap().push(code.to_owned());
        self.gate.pass().await;
        self.callback_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Rejected("unexpected callback".into())))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedSession, ProviderError> {
        self.refreshes.lock().unwrap().push(refresh_token.to_owned());
        self.gate.pass().await;
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Rejected("unexpected refresh".into())))
    }
}

// =============================================================================
// Tenant API
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeTenantApi {
    pub tokens: Mutex<Vec<String>>,
    results: Mutex<VecDeque<Result<TenantConfigResponse, TenantApiError>>>,
    gate: Gate,
}

impl FakeTenantApi {
    /// Park subsequent fetches until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        self.gate.hold()
    }

    pub fn respond(&self, body: serde_json::Value) {
        let parsed = serde_json::from_value(body).unwrap();
        self.results.lock().unwrap().push_back(Ok(parsed));
    }

    pub fn fail(&self, err: TenantApiError) {
        self.results.lock().unwrap().push_back(Err(err));
    }

    pub fn fetch_count(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

#[async_trait]
impl TenantApi for FakeTenantApi {
    async fn fetch_tenant_config(&self, access_token: &str) -> Result<TenantConfigResponse, TenantApiError> {
        self.tokens.lock().unwrap().push(access_token.to_owned());
        self.gate.pass().await;
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TenantApiError::Status(503)))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub(crate) struct Harness {
    pub local: Arc<MemoryStorage>,
    pub session: Arc<MemoryStorage>,
    pub identity: Arc<FakeIdentity>,
    pub tenant_api: Arc<FakeTenantApi>,
    pub location: Arc<MemoryLocation>,
    pub cookies: Arc<MemoryCookieJar>,
}

impl Harness {
    pub fn new() -> Self {
        Self::at("https://app.example.com/dashboard")
    }

    pub fn at(url: &str) -> Self {
        Self {
            local: Arc::new(MemoryStorage::new()),
            session: Arc::new(MemoryStorage::new()),
            identity: Arc::new(FakeIdentity::default()),
            tenant_api: Arc::new(FakeTenantApi::default()),
            location: Arc::new(MemoryLocation::new(Url::parse(url).unwrap())),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }

    pub fn config() -> SessionConfig {
        let mut config = SessionConfig::with_base_url(Url::parse("https://api.example.com").unwrap());
        config.refresh.jitter = std::time::Duration::ZERO;
        config
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(
            Self::config(),
            Collaborators {
                local: self.local.clone(),
                session: self.session.clone(),
                identity: self.identity.clone(),
                tenant_api: self.tenant_api.clone(),
                location: self.location.clone(),
                cookies: self.cookies.clone(),
            },
        )
    }
}
