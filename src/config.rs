//! Session configuration parsed from environment variables.
//!
//! SYSTEM CONTEXT
//! ==============
//! The library never reads the environment on its own; the binary (or an
//! embedding application) builds a [`SessionConfig`] once and hands it to
//! [`crate::session::SessionContext`].

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_OAUTH_CLIENT_ID: &str = "web";
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 60;
pub const DEFAULT_REFRESH_JITTER_SECS: u64 = 60;
pub const DEFAULT_REHYDRATE_DELAY_MS: u64 = 100;
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

pub const AUTH_STORAGE_KEY: &str = "auth-storage";
pub const TENANT_STORAGE_KEY: &str = "tenant-storage";
pub const REFRESH_TOKEN_KEY: &str = "refresh-token";
pub const TENANT_COOKIE_NAME: &str = "tenant-id";

/// Named storage slots and the cross-process cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// Local-storage slot for the persisted credential tuple.
    pub auth: String,
    /// Local-storage slot for the persisted tenant config.
    pub tenant: String,
    /// Session-storage slot holding the raw refresh credential.
    pub refresh_token: String,
    /// Cookie written after a successful tenant fetch.
    pub tenant_cookie: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            auth: AUTH_STORAGE_KEY.to_owned(),
            tenant: TENANT_STORAGE_KEY.to_owned(),
            refresh_token: REFRESH_TOKEN_KEY.to_owned(),
            tenant_cookie: TENANT_COOKIE_NAME.to_owned(),
        }
    }
}

/// Refresh scheduling window. The effective lead time is drawn from
/// `lead..=lead + jitter` each time the scheduler arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshWindow {
    pub lead: Duration,
    pub jitter: Duration,
}

impl Default for RefreshWindow {
    fn default() -> Self {
        Self {
            lead: Duration::from_secs(DEFAULT_REFRESH_LEAD_SECS),
            jitter: Duration::from_secs(DEFAULT_REFRESH_JITTER_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_base_url: Url,
    pub oauth_token_url: Url,
    pub oauth_client_id: String,
    pub oauth_redirect_uri: String,
    pub refresh: RefreshWindow,
    /// How long the tenant loader waits for store rehydration before inspecting state.
    pub rehydrate_delay: Duration,
    pub login_path: String,
    pub http_timeout: Duration,
    pub keys: StorageKeys,
}

impl SessionConfig {
    /// Build a config rooted at `api_base_url` with every other field defaulted.
    #[must_use]
    pub fn with_base_url(api_base_url: Url) -> Self {
        let oauth_token_url = derive_url(&api_base_url, "/auth/v1/token");
        let oauth_redirect_uri = derive_url(&api_base_url, "/auth/callback").to_string();
        Self {
            api_base_url,
            oauth_token_url,
            oauth_client_id: DEFAULT_OAUTH_CLIENT_ID.to_owned(),
            oauth_redirect_uri,
            refresh: RefreshWindow::default(),
            rehydrate_delay: Duration::from_millis(DEFAULT_REHYDRATE_DELAY_MS),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            keys: StorageKeys::default(),
        }
    }

    /// Build typed session config from environment variables.
    ///
    /// Optional:
    /// - `SESSION_API_BASE_URL`: default `http://127.0.0.1:3000`
    /// - `SESSION_OAUTH_TOKEN_URL`: default `<base>/auth/v1/token`
    /// - `SESSION_OAUTH_CLIENT_ID`: default `web`
    /// - `SESSION_OAUTH_REDIRECT_URI`: default `<base>/auth/callback`
    /// - `SESSION_REFRESH_LEAD_SECS`: default 60
    /// - `SESSION_REFRESH_JITTER_SECS`: default 60
    /// - `SESSION_REHYDRATE_DELAY_MS`: default 100
    /// - `SESSION_LOGIN_PATH`: default `/login`
    /// - `SESSION_HTTP_TIMEOUT_SECS`: default 15
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a URL or numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = parse_url_var(
            "SESSION_API_BASE_URL",
            std::env::var("SESSION_API_BASE_URL").ok().as_deref(),
            DEFAULT_API_BASE_URL,
        )?;
        let mut config = Self::with_base_url(base);

        if let Ok(raw) = std::env::var("SESSION_OAUTH_TOKEN_URL") {
            config.oauth_token_url = parse_url_var("SESSION_OAUTH_TOKEN_URL", Some(&raw), &raw)?;
        }
        if let Ok(raw) = std::env::var("SESSION_OAUTH_CLIENT_ID") {
            config.oauth_client_id = raw;
        }
        if let Ok(raw) = std::env::var("SESSION_OAUTH_REDIRECT_URI") {
            config.oauth_redirect_uri = raw;
        }
        if let Ok(raw) = std::env::var("SESSION_LOGIN_PATH") {
            config.login_path = raw;
        }

        config.refresh = RefreshWindow {
            lead: Duration::from_secs(env_parse("SESSION_REFRESH_LEAD_SECS", DEFAULT_REFRESH_LEAD_SECS)?),
            jitter: Duration::from_secs(env_parse("SESSION_REFRESH_JITTER_SECS", DEFAULT_REFRESH_JITTER_SECS)?),
        };
        config.rehydrate_delay =
            Duration::from_millis(env_parse("SESSION_REHYDRATE_DELAY_MS", DEFAULT_REHYDRATE_DELAY_MS)?);
        config.http_timeout = Duration::from_secs(env_parse("SESSION_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?);

        Ok(config)
    }

    /// URL of the tenant-config endpoint.
    #[must_use]
    pub fn tenant_config_url(&self) -> Url {
        derive_url(&self.api_base_url, "/api/v1/config/tenant")
    }
}

fn derive_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url
}

fn parse_url_var(var: &'static str, raw: Option<&str>, default: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.unwrap_or(default)).map_err(|source| ConfigError::InvalidUrl { var, source })
}

/// Unset falls back to `default`; set-but-malformed is an error.
fn env_parse(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
