//! Tenant-config endpoint: `GET /api/v1/config/tenant`.
//!
//! SYSTEM CONTEXT
//! ==============
//! This is the call that establishes tenant identity from the access token's
//! subject, so it is sent with a bearer header only and never a tenant header.
//!
//! The endpoint has historically named the tenant identifier `tenantId`,
//! `recordId`, or `id`; [`TenantConfigResponse::record_id`] accepts all three
//! in that precedence.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::config::SessionConfig;
use crate::error::TenantApiError;
use crate::state::credentials::normalize_role;
use crate::state::tenant::{Plan, TenantConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUser {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantConfigResponse {
    pub tenant_id: Option<Value>,
    pub record_id: Option<Value>,
    pub id: Option<Value>,
    pub account_code: Option<String>,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub plan: Option<String>,
    pub settings: Option<Map<String, Value>>,
    pub theme: Option<Map<String, Value>>,
    pub feature_flags: Option<Map<String, Value>>,
    pub user: Option<TenantUser>,
}

/// A tenant response reduced to what the stores need.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTenant {
    pub config: TenantConfig,
    /// Normalized role of the calling user within the tenant, if reported.
    pub role: Option<String>,
}

impl TenantConfigResponse {
    /// Tenant identifier, preferring `tenantId`, then `recordId`, then `id`.
    #[must_use]
    pub fn record_id(&self) -> Option<String> {
        [&self.tenant_id, &self.record_id, &self.id]
            .into_iter()
            .flatten()
            .find_map(id_string)
    }

    /// # Errors
    ///
    /// Returns [`TenantApiError::Malformed`] when no tenant identifier is present.
    pub fn resolve(self) -> Result<ResolvedTenant, TenantApiError> {
        let record_id = self
            .record_id()
            .ok_or_else(|| TenantApiError::Malformed("no tenant identifier in response".to_owned()))?;

        let config = TenantConfig {
            record_id,
            account_code: self.account_code.filter(|c| !c.is_empty()),
            slug: self.slug.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            plan: self.plan.as_deref().map_or(Plan::Free, Plan::from_label),
            settings: self.settings.unwrap_or_default(),
            theme: self.theme.unwrap_or_default(),
            feature_flags: self.feature_flags.unwrap_or_default(),
        };
        let role = normalize_role(self.user.and_then(|u| u.role));
        Ok(ResolvedTenant { config, role })
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait TenantApi: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TenantApiError`] on transport failure, non-2xx status, or an undecodable body.
    async fn fetch_tenant_config(&self, access_token: &str) -> Result<TenantConfigResponse, TenantApiError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

pub struct HttpTenantApi {
    http: reqwest::Client,
    url: String,
}

impl HttpTenantApi {
    /// # Errors
    ///
    /// Returns [`TenantApiError::Transport`] if the HTTP client fails to build.
    pub fn new(config: &SessionConfig) -> Result<Self, TenantApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TenantApiError::Transport(e.to_string()))?;
        Ok(Self { http, url: config.tenant_config_url().to_string() })
    }
}

#[async_trait]
impl TenantApi for HttpTenantApi {
    #[instrument(skip_all)]
    async fn fetch_tenant_config(&self, access_token: &str) -> Result<TenantConfigResponse, TenantApiError> {
        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TenantApiError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TenantApiError::Status(resp.status().as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TenantApiError::Transport(e.to_string()))?;
        parse_tenant_response(&body)
    }
}

fn parse_tenant_response(body: &str) -> Result<TenantConfigResponse, TenantApiError> {
    serde_json::from_str(body).map_err(|e| TenantApiError::Malformed(e.to_string()))
}

#[cfg(test)]
#[path = "tenant_api_test.rs"]
mod tests;
