//! Mock objects and fake implementations for testing
//!
//! Every mock records how it was used so tests can assert on interaction
//! (for example "no provider call was made") as well as on outcomes.

use crate::api::{ApiClient, TokenGrant};
use crate::models::auth::{ApiError, SsoError};
use crate::models::{LogoutOptions, RegistrationRequest, UserProfile};
use crate::sso::{AuthChange, Navigator, SsoProvider};
use crate::token_store::TokenStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How [`MockSsoProvider::logout`] behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutBehavior {
    Succeed,
    Fail(SsoError),
    /// Never resolves
    Hang,
}

#[derive(Debug)]
struct MockSsoState {
    init_result: Result<bool, SsoError>,
    init_hangs: bool,
    authenticated: bool,
    token: Option<String>,
    refresh_succeeds: bool,
    profile: Option<UserProfile>,
    logout: LogoutBehavior,
}

/// Scriptable [`SsoProvider`]
///
/// Counts every asynchronous provider call. `subscribe` is not counted.
pub struct MockSsoProvider {
    state: Mutex<MockSsoState>,
    events: broadcast::Sender<AuthChange>,
    calls: AtomicUsize,
    init_calls: AtomicUsize,
    token_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl Default for MockSsoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSsoProvider {
    /// Provider without a session
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MockSsoState {
                init_result: Ok(false),
                init_hangs: false,
                authenticated: false,
                token: None,
                refresh_succeeds: false,
                profile: None,
                logout: LogoutBehavior::Succeed,
            }),
            events,
            calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    /// Provider that reports a session holding `token`
    #[must_use]
    pub fn authenticated(token: &str) -> Self {
        let provider = Self::new();
        {
            let mut state = lock(&provider.state);
            state.init_result = Ok(true);
            state.authenticated = true;
            state.token = Some(token.to_string());
        }
        provider
    }

    /// Provider that reports a session but cannot hand out a token
    #[must_use]
    pub fn authenticated_without_token() -> Self {
        let provider = Self::authenticated("unused");
        lock(&provider.state).token = None;
        provider
    }

    #[must_use]
    pub fn with_profile(self, profile: UserProfile) -> Self {
        lock(&self.state).profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_logout(self, behavior: LogoutBehavior) -> Self {
        lock(&self.state).logout = behavior;
        self
    }

    #[must_use]
    pub fn with_init_error(self, error: SsoError) -> Self {
        lock(&self.state).init_result = Err(error);
        self
    }

    /// `init` never resolves
    #[must_use]
    pub fn with_hanging_init(self) -> Self {
        lock(&self.state).init_hangs = true;
        self
    }

    #[must_use]
    pub fn with_refresh(self, succeeds: bool) -> Self {
        lock(&self.state).refresh_succeeds = succeeds;
        self
    }

    /// Change the session the provider reports from now on
    pub fn set_session(&self, token: Option<&str>) {
        let mut state = lock(&self.state);
        state.authenticated = token.is_some();
        state.token = token.map(ToString::to_string);
    }

    /// Push a provider-side transition to subscribers
    pub fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    fn record(&self, counter: &AtomicUsize) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SsoProvider for MockSsoProvider {
    async fn init(&self) -> Result<bool, SsoError> {
        self.record(&self.init_calls);
        let (hangs, result) = {
            let state = lock(&self.state);
            (state.init_hangs, state.init_result.clone())
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn is_authenticated(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).authenticated
    }

    async fn get_token(&self) -> Option<String> {
        self.record(&self.token_calls);
        lock(&self.state).token.clone()
    }

    async fn refresh_token(&self) -> bool {
        self.record(&self.refresh_calls);
        let mut state = lock(&self.state);
        if !state.refresh_succeeds {
            state.authenticated = false;
        }
        state.refresh_succeeds
    }

    async fn login(&self) -> Result<(), SsoError> {
        self.record(&self.login_calls);
        Ok(())
    }

    async fn logout(&self, _options: &LogoutOptions) -> Result<(), SsoError> {
        self.record(&self.logout_calls);
        let behavior = lock(&self.state).logout.clone();
        match behavior {
            LogoutBehavior::Succeed => {
                self.set_session(None);
                Ok(())
            }
            LogoutBehavior::Fail(error) => Err(error),
            LogoutBehavior::Hang => std::future::pending().await,
        }
    }

    async fn get_user_profile(&self) -> Option<UserProfile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        if state.authenticated {
            state.profile.clone()
        } else {
            None
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    fn service_name(&self) -> &'static str {
        "mock"
    }
}

/// Scriptable [`ApiClient`]
///
/// Unscripted calls fail with HTTP 500.
pub struct MockApiClient {
    exchange: Mutex<Result<TokenGrant, ApiError>>,
    profile: Mutex<Result<UserProfile, ApiError>>,
    login: Mutex<Result<TokenGrant, ApiError>>,
    register: Mutex<Result<TokenGrant, ApiError>>,
    exchanged_tokens: Mutex<Vec<String>>,
    profile_tokens: Mutex<Vec<String>>,
    registrations: Mutex<Vec<RegistrationRequest>>,
    login_calls: AtomicUsize,
}

impl Default for MockApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApiClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exchange: Mutex::new(Err(Self::server_error())),
            profile: Mutex::new(Err(Self::server_error())),
            login: Mutex::new(Err(Self::server_error())),
            register: Mutex::new(Err(Self::server_error())),
            exchanged_tokens: Mutex::new(Vec::new()),
            profile_tokens: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            login_calls: AtomicUsize::new(0),
        }
    }

    /// HTTP error with the given status
    #[must_use]
    pub fn status(status: u16) -> ApiError {
        ApiError::Status {
            status,
            message: format!("HTTP {status}"),
        }
    }

    fn server_error() -> ApiError {
        Self::status(500)
    }

    #[must_use]
    pub fn with_exchange(self, result: Result<TokenGrant, ApiError>) -> Self {
        *lock(&self.exchange) = result;
        self
    }

    #[must_use]
    pub fn with_profile(self, result: Result<UserProfile, ApiError>) -> Self {
        *lock(&self.profile) = result;
        self
    }

    #[must_use]
    pub fn with_login(self, result: Result<TokenGrant, ApiError>) -> Self {
        *lock(&self.login) = result;
        self
    }

    #[must_use]
    pub fn with_register(self, result: Result<TokenGrant, ApiError>) -> Self {
        *lock(&self.register) = result;
        self
    }

    /// Replace the scripted profile response
    pub fn set_profile(&self, result: Result<UserProfile, ApiError>) {
        *lock(&self.profile) = result;
    }

    /// SSO tokens received by `exchange_token`, in call order
    #[must_use]
    pub fn exchanged_tokens(&self) -> Vec<String> {
        lock(&self.exchanged_tokens).clone()
    }

    /// Access tokens received by `fetch_profile`, in call order
    #[must_use]
    pub fn profile_tokens(&self) -> Vec<String> {
        lock(&self.profile_tokens).clone()
    }

    #[must_use]
    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        lock(&self.registrations).clone()
    }

    #[must_use]
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn exchange_token(&self, sso_token: &str) -> Result<TokenGrant, ApiError> {
        lock(&self.exchanged_tokens).push(sso_token.to_string());
        lock(&self.exchange).clone()
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        lock(&self.profile_tokens).push(access_token.to_string());
        lock(&self.profile).clone()
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<TokenGrant, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.login).clone()
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<TokenGrant, ApiError> {
        lock(&self.registrations).push(request.clone());
        lock(&self.register).clone()
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    max_age_seconds: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory [`TokenStore`] that remembers the lifetime of each write
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one entry
    #[must_use]
    pub fn with_entry(key: &str, value: &str, max_age_seconds: u64) -> Self {
        let store = Self::new();
        store.set(key, value, max_age_seconds);
        store
    }

    /// Lifetime passed to the last `set` of `key`
    #[must_use]
    pub fn max_age(&self, key: &str) -> Option<u64> {
        lock(&self.entries).get(key).map(|e| e.max_age_seconds)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, key: &str, value: &str, max_age_seconds: u64) {
        let lifetime = i64::try_from(max_age_seconds).unwrap_or(i64::from(u32::MAX));
        lock(&self.entries).insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                max_age_seconds,
                expires_at: Utc::now() + Duration::seconds(lifetime),
            },
        );
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

/// [`Navigator`] that records navigations instead of performing them
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    current: Mutex<Option<String>>,
    assigned: Mutex<Vec<String>>,
    replaced: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new(current_url: Option<&str>) -> Self {
        Self {
            current: Mutex::new(current_url.map(ToString::to_string)),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn assigned(&self) -> Vec<String> {
        lock(&self.assigned).clone()
    }

    #[must_use]
    pub fn replaced(&self) -> Vec<String> {
        lock(&self.replaced).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_url(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    fn assign(&self, url: &str) {
        lock(&self.assigned).push(url.to_string());
    }

    fn replace(&self, url: &str) {
        lock(&self.replaced).push(url.to_string());
        *lock(&self.current) = Some(url.to_string());
    }
}
