use actix_web::cookie::{time::Duration, Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::TokenStore;
use crate::settings::CookieSettings;

/// Browsers cap cookie lifetimes at 400 days
const MAX_COOKIE_AGE_SECONDS: u64 = 400 * 24 * 60 * 60;

struct CookieState {
    jar: CookieJar,
    expirations: HashMap<String, DateTime<Utc>>,
}

/// Cookie-backed token store for the browser context
///
/// Values live in a [`CookieJar`]; every write is mirrored as a `Set-Cookie`
/// delta that the host can flush with [`CookieTokenStore::set_cookie_headers`].
pub struct CookieTokenStore {
    secure: bool,
    path: String,
    state: Mutex<CookieState>,
}

impl CookieTokenStore {
    #[must_use]
    pub fn new(secure: bool, path: impl Into<String>) -> Self {
        Self {
            secure,
            path: path.into(),
            state: Mutex::new(CookieState {
                jar: CookieJar::new(),
                expirations: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &CookieSettings) -> Self {
        Self::new(settings.secure, settings.path.clone())
    }

    /// Seed the jar from an incoming `Cookie:` header
    ///
    /// Values are percent-decoded, matching how they are rendered by
    /// [`CookieTokenStore::set_cookie_headers`].
    ///
    /// Hydrated cookies carry no expiry of their own: the browser only sends
    /// cookies that are still alive.
    pub fn hydrate(&self, cookie_header: &str) {
        let mut state = self.lock();
        for part in cookie_header.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match Cookie::parse_encoded(part.to_string()) {
                Ok(cookie) => state.jar.add_original(cookie),
                Err(e) => log::debug!("Skipping malformed cookie pair: {e}"),
            }
        }
    }

    /// Render the pending `Set-Cookie` header values
    #[must_use]
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.lock()
            .jar
            .delta()
            .map(|cookie| cookie.encoded().to_string())
            .collect()
    }

    fn build_cookie(&self, name: &str, value: &str, max_age_seconds: u64) -> Cookie<'static> {
        let max_age = i64::try_from(max_age_seconds.min(MAX_COOKIE_AGE_SECONDS)).unwrap_or(0);
        Cookie::build(name.to_owned(), value.to_owned())
            .path(self.path.clone())
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(Duration::seconds(max_age))
            .finish()
    }

    fn lock(&self) -> MutexGuard<'_, CookieState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for CookieTokenStore {
    fn set(&self, key: &str, value: &str, max_age_seconds: u64) {
        let cookie = self.build_cookie(key, value, max_age_seconds);
        let lifetime = chrono::Duration::seconds(
            i64::try_from(max_age_seconds.min(MAX_COOKIE_AGE_SECONDS)).unwrap_or(0),
        );

        let mut state = self.lock();
        state.jar.add(cookie);
        state
            .expirations
            .insert(key.to_string(), Utc::now() + lifetime);
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut state = self.lock();

        if let Some(expires_at) = state.expirations.get(key).copied() {
            if expires_at <= Utc::now() {
                log::debug!("Cookie '{key}' expired at {expires_at}, dropping it");
                state.expirations.remove(key);
                state
                    .jar
                    .remove(Cookie::build(key.to_owned(), "").path(self.path.clone()).finish());
                return None;
            }
        }

        state
            .jar
            .get(key)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    fn delete(&self, key: &str) {
        let mut state = self.lock();
        state.expirations.remove(key);
        state
            .jar
            .remove(Cookie::build(key.to_owned(), "").path(self.path.clone()).finish());
    }
}
