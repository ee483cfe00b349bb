//! Token persistence
//!
//! [`TokenStore`] is an opaque key/value store with per-entry expiry. Writes are
//! synchronous so that a session reset is complete the moment it returns.
//!
//! - [`cookie`] - Cookie-backed store used in the browser context
//! - [`noop`] - Store for contexts without persistent client storage

pub mod cookie;
pub mod noop;

pub use cookie::CookieTokenStore;
pub use noop::NoopTokenStore;

use std::fmt;

/// Key under which the first-party access token is stored
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key under which a first-party refresh token is stored
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key/value persistence with expiry
///
/// Implementations never fail: a store that cannot persist silently drops the
/// write and answers `None` on read.
pub trait TokenStore: Send + Sync {
    /// Store `value` under `key` for `max_age_seconds`
    fn set(&self, key: &str, value: &str, max_age_seconds: u64);

    /// Read a non-expired value
    fn get(&self, key: &str) -> Option<String>;

    /// Remove `key`
    fn delete(&self, key: &str);
}

/// First-party bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Normalize a raw stored or received value, stripping any `Bearer ` scheme
    ///
    /// Returns `None` for blank values.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let token = match trimmed.get(..6) {
            Some(scheme)
                if scheme.eq_ignore_ascii_case("bearer")
                    && trimmed[6..].chars().next().map_or(true, char::is_whitespace) =>
            {
                trimmed[6..].trim()
            }
            _ => trimmed,
        };

        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    /// Read and normalize the access token from `store`
    #[must_use]
    pub fn from_store(store: &dyn TokenStore) -> Option<Self> {
        store
            .get(ACCESS_TOKEN_KEY)
            .and_then(|raw| Self::normalize(&raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(len={})", self.0.len())
    }
}
