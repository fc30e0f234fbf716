//! Access-token inspection.
//!
//! DESIGN
//! ======
//! The client never verifies signatures (the API does that on every request);
//! it only reads the JWT payload to learn `exp` for refresh scheduling and
//! `sub`/`email`/`role` to describe the session user.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer};

use crate::error::TokenError;

/// The subset of JWT claims the session layer reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    /// Expiry, seconds since the Unix epoch. Fractional values are truncated.
    #[serde(default, deserialize_with = "unix_seconds")]
    pub exp: Option<u64>,
    pub role: Option<String>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(secs) = number.as_u64() {
        return Ok(Some(secs));
    }
    match number.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(secs.trunc() as u64)),
        _ => Err(serde::de::Error::custom(format!("exp is not a non-negative number: {number}"))),
    }
}

/// Decode the payload segment of a JWT without verifying it.
///
/// # Errors
///
/// Returns [`TokenError`] if the token is not three dot-separated segments or
/// the payload is not base64url-encoded JSON.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::NotJwt);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Payload(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))
}

/// Expiry of `token` in Unix seconds.
///
/// # Errors
///
/// Returns [`TokenError::MissingExpiry`] for a JWT without `exp`, or the decode error.
pub fn expires_at(token: &str) -> Result<u64, TokenError> {
    decode_claims(token)?.exp.ok_or(TokenError::MissingExpiry)
}

/// Current wall-clock time in Unix seconds.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// How long to wait before refreshing a token that expires at `expires_at`.
/// Zero when the token is already inside its lead window.
#[must_use]
pub fn fire_delay(expires_at: u64, now: u64, lead: Duration) -> Duration {
    let fire_at = expires_at.saturating_sub(lead.as_secs());
    Duration::from_secs(fire_at.saturating_sub(now))
}

/// True when the token is within `lead` of expiry, or already expired.
#[must_use]
pub fn within_lead_window(expires_at: u64, now: u64, lead: Duration) -> bool {
    fire_delay(expires_at, now, lead).is_zero()
}

/// Build an unsigned JWT carrying `claims`. Test fixture shared across modules.
#[cfg(test)]
pub(crate) fn test_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
