//! Host-environment seams: location, cookies, and tab visibility.
//!
//! SYSTEM CONTEXT
//! ==============
//! In a browser these are `window.location`, `document.cookie`, and the
//! `visibilitychange` event. The session layer only depends on the traits
//! and the watch channel below, so the CLI and tests supply in-memory hosts.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use url::Url;

const CODE_PARAM: &str = "code";
const STATE_PARAM: &str = "state";

// =============================================================================
// LOCATION
// =============================================================================

/// The current page location plus the two ways of changing it.
pub trait Location: Send + Sync {
    fn current(&self) -> Url;

    /// Rewrite the current URL in place without navigating (history replace).
    fn replace(&self, url: Url);

    /// Leave the page for `path` (hard redirect).
    fn navigate(&self, path: &str);
}

/// The OAuth authorization code carried in `url`'s query, if any.
#[must_use]
pub fn authorization_code(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == CODE_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `url` with the `code` and `state` parameters removed, other params preserved.
#[must_use]
pub fn without_authorization_code(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != CODE_PARAM && k != STATE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// In-memory location recording every navigation.
#[derive(Debug)]
pub struct MemoryLocation {
    current: Mutex<Url>,
    navigations: Mutex<Vec<String>>,
}

impl MemoryLocation {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { current: Mutex::new(url), navigations: Mutex::new(Vec::new()) }
    }

    /// Paths passed to [`Location::navigate`], oldest first.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Location for MemoryLocation {
    fn current(&self) -> Url {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, url: Url) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }

    fn navigate(&self, path: &str) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(next) = current.join(path) {
            *current = next;
        }
        self.navigations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_owned());
    }
}

// =============================================================================
// COOKIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
}

impl Cookie {
    /// Site-wide cookie with no explicit expiry.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), path: "/".to_owned() }
    }

    /// `Set-Cookie`-style serialization consumed by server-rendering middleware.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{}={}; Path={}; SameSite=Lax", self.name, self.value, self.path)
    }
}

/// Write-only cookie sink.
pub trait CookieJar: Send + Sync {
    fn set_cookie(&self, cookie: Cookie);
    fn remove_cookie(&self, name: &str);
}

#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, Cookie>>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Cookie> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn set_cookie(&self, cookie: Cookie) {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie.name.clone(), cookie);
    }

    fn remove_cookie(&self, name: &str) {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner).remove(name);
    }
}

// =============================================================================
// VISIBILITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Create a visibility signal starting in the foreground. The host keeps the
/// sender and flips it on tab show/hide; the scheduler subscribes to receivers.
#[must_use]
pub fn visibility_channel() -> (watch::Sender<Visibility>, watch::Receiver<Visibility>) {
    watch::channel(Visibility::Visible)
}

#[cfg(test)]
#[path = "host_test.rs"]
mod tests;
