//! Error taxonomy for the session subsystem.
//!
//! ERROR HANDLING
//! ==============
//! Each collaborator seam has its own error type. Only [`ProviderError`]
//! changes authentication state (it triggers teardown); tenant-fetch and
//! storage failures are absorbed where they occur and merely logged.

/// Local/session storage failures. Always absorbed by callers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity-provider exchange failures (bad/expired code, revoked refresh credential).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider rejected the exchange: {0}")]
    Rejected(String),
    #[error("identity provider transport failed: {0}")]
    Transport(String),
    #[error("identity provider response malformed: {0}")]
    Malformed(String),
    #[error("no refresh credential stored")]
    MissingRefreshCredential,
}

/// Tenant-config endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum TenantApiError {
    #[error("tenant config request failed: {0}")]
    Status(u16),
    #[error("tenant config transport failed: {0}")]
    Transport(String),
    #[error("tenant config response malformed: {0}")]
    Malformed(String),
}

/// Access-token decoding failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("access token is not a JWT")]
    NotJwt,
    #[error("access token payload undecodable: {0}")]
    Payload(String),
    #[error("access token carries no exp claim")]
    MissingExpiry,
}

/// Configuration parse failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
    #[error("invalid url for {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Umbrella error for the session orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    TenantApi(#[from] TenantApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session has no access token")]
    Unauthenticated,
}
