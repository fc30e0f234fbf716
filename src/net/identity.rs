//! Identity-provider seam: authorization-code and refresh-credential exchanges.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session layer treats the provider as two opaque remote calls. Failure
//! of either is an expected outcome (expired code, revoked refresh
//! credential), reported as [`ProviderError`] rather than a panic.
//!
//! [`HttpIdentityProvider`] speaks the standard OAuth2 token endpoint
//! (`authorization_code` and `refresh_token` grants, form-encoded).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SessionConfig;
use crate::error::ProviderError;

/// Result of exchanging an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Result of exchanging a refresh credential. A rotated refresh credential,
/// when present, replaces the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub role: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for a session.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the code is rejected or the call fails.
    async fn handle_callback(&self, code: &str) -> Result<ProviderSession, ProviderError>;

    /// Exchange a refresh credential for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the credential is rejected or the call fails.
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedSession, ProviderError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenEndpointError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct HttpIdentityProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    redirect_uri: String,
}

impl HttpIdentityProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] if the HTTP client fails to build.
    pub fn new(config: &SessionConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            token_url: config.oauth_token_url.to_string(),
            client_id: config.oauth_client_id.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
        })
    }

    async fn post_grant(&self, params: &[(&str, &str)]) -> Result<TokenEndpointResponse, ProviderError> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &body));
        }
        parse_token_response(&body)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all)]
    async fn handle_callback(&self, code: &str) -> Result<ProviderSession, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let resp = self.post_grant(&params).await?;
        debug!(has_refresh = resp.refresh_token.is_some(), "authorization code exchanged");
        Ok(ProviderSession { access_token: resp.access_token, refresh_token: resp.refresh_token })
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedSession, ProviderError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        let resp = self.post_grant(&params).await?;
        debug!(rotated = resp.refresh_token.is_some(), "refresh credential exchanged");
        Ok(RefreshedSession {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            role: resp.role,
        })
    }
}

fn parse_token_response(body: &str) -> Result<TokenEndpointResponse, ProviderError> {
    let parsed: TokenEndpointResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if parsed.access_token.is_empty() {
        return Err(ProviderError::Malformed("missing access_token".to_owned()));
    }
    Ok(parsed)
}

/// 4xx means the grant itself was refused; anything else is a transport problem.
fn classify_failure(status: u16, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<TokenEndpointError>(body).unwrap_or_default();
    let reason = detail
        .error_description
        .or(detail.error)
        .unwrap_or_else(|| format!("status {status}"));
    if (400..500).contains(&status) {
        ProviderError::Rejected(reason)
    } else {
        ProviderError::Transport(reason)
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
