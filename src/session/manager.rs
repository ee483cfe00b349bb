//! Authentication Session Manager
//!
//! This module provides the `AuthSessionManager`, the single source of truth for
//! "is the user logged in, and who are they".
//!
//! ## State
//!
//! The session is four independent [`SessionFlags`] plus the cached
//! [`UserProfile`]. Every transition is a full overwrite of the affected fields
//! under one lock, so concurrent transitions (an exchange started by `init` and
//! another started by a provider event) converge on the last writer instead of
//! corrupting each other. After every write the derived [`AuthState`] is
//! published on a watch channel.
//!
//! ## Organization
//!
//! 1. **Construction** - Manager creation and shutdown
//! 2. **Initialization** - `init` and the provider event listener
//! 3. **Token Acquisition** - SSO exchange and first-party credential paths
//! 4. **Profile Loading** - Backend and provider profiles
//! 5. **Teardown** - Logout and the unconditional reset
//! 6. **Queries** - Roles, flags and the published state
//! 7. **Tests** - Unit tests for functionality verification

use crate::api::{ApiClient, TokenGrant};
use crate::models::auth::AuthError;
use crate::models::{
    AuthState, LogoutOptions, RegistrationRequest, SessionFlags, SessionPhase, UserProfile,
};
use crate::settings::{ExecutionContext, SessionSettings};
use crate::sso::{AuthChange, SsoProvider};
use crate::token_store::{AccessToken, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::utils::logging::LoggingHelper;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

// =============================================================================
// Session Manager Structure
// =============================================================================

#[derive(Debug, Default)]
struct SessionState {
    flags: SessionFlags,
    user: Option<UserProfile>,
}

impl SessionState {
    fn projection(&self) -> AuthState {
        AuthState {
            is_initialized: self.flags.is_initialized,
            is_authenticated: self.flags.is_authenticated,
            user: self.user.clone(),
        }
    }
}

struct SessionInner {
    context: ExecutionContext,
    settings: SessionSettings,
    sso: Arc<dyn SsoProvider>,
    api: Arc<dyn ApiClient>,
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    published: watch::Sender<AuthState>,
    init_outcome: OnceCell<Result<(), AuthError>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Authoritative authentication session
///
/// Cheap to clone; clones share one session. Construct it once at the
/// composition root (see [`AuthenticationServiceFactory`](crate::authentication::AuthenticationServiceFactory))
/// and pass it to whatever needs to read or drive the session.
#[derive(Clone)]
pub struct AuthSessionManager {
    inner: Arc<SessionInner>,
}

// =============================================================================
// 1. Construction
// =============================================================================

impl AuthSessionManager {
    /// Create a manager over the given strategies
    ///
    /// `context` is fixed for the manager's lifetime; in
    /// [`ExecutionContext::Server`] `init` completes without touching any
    /// collaborator.
    #[must_use]
    pub fn new(
        context: ExecutionContext,
        settings: SessionSettings,
        sso: Arc<dyn SsoProvider>,
        api: Arc<dyn ApiClient>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (published, _) = watch::channel(AuthState::default());
        Self {
            inner: Arc::new(SessionInner {
                context,
                settings,
                sso,
                api,
                store,
                state: RwLock::new(SessionState::default()),
                published,
                init_outcome: OnceCell::new(),
                listener: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.inner.context
    }

    /// Name of the SSO provider in use
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.inner.sso.service_name()
    }

    /// Stop listening to provider events
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            log::debug!("Stopped listening to {} events", self.provider_name());
        }
    }

    fn update_state(&self, apply: impl FnOnce(&mut SessionState)) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apply(&mut *state);
        let next = state.projection();
        // Published under the lock so observers see writes in order
        self.inner.published.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn read_state<T>(&self, read: impl FnOnce(&SessionState) -> T) -> T {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        read(&*state)
    }

    fn stored_token(&self) -> Option<AccessToken> {
        AccessToken::from_store(self.inner.store.as_ref())
    }

    /// Reset when the session claims a token the store no longer holds
    ///
    /// Returns `true` if the session was reset.
    fn expire_if_token_missing(&self) -> bool {
        if !self.flags().is_authenticated || self.stored_token().is_some() {
            return false;
        }
        log::info!("Access token is gone from the token store, ending the session");
        self.reset_auth_state();
        true
    }
}

// =============================================================================
// 2. Initialization
// =============================================================================

impl AuthSessionManager {
    /// Initialize the session
    ///
    /// Only the first call has any effect; later and concurrent calls wait for
    /// the first one and return its outcome. On return `is_initialized()` is
    /// true, except in the server context where nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotRegistered`] when the provider reports a session
    /// whose identity has no first-party account. Every other failure is
    /// logged and leaves the session unauthenticated or SSO-only.
    pub async fn init(&self) -> Result<(), AuthError> {
        self.inner
            .init_outcome
            .get_or_init(|| self.run_init())
            .await
            .clone()
    }

    async fn run_init(&self) -> Result<(), AuthError> {
        if self.inner.context == ExecutionContext::Server {
            LoggingHelper::log_session_init_skipped();
            return Ok(());
        }

        LoggingHelper::log_session_init_start(self.inner.context);
        self.update_state(|s| s.flags.is_loading = true);
        self.start_listener();

        let outcome = if self.stored_token().is_some() {
            self.update_state(|s| {
                s.flags.is_authenticated = true;
                s.flags.is_initialized = true;
                s.flags.is_loading = false;
            });
            self.load_user_profile().await;
            Ok(())
        } else {
            self.init_from_provider().await
        };

        self.update_state(|s| {
            s.flags.is_initialized = true;
            s.flags.is_loading = false;
        });
        let user_id = self.read_state(|s| s.user.as_ref().map(|u| u.id.clone()));
        LoggingHelper::log_session_init_complete(self.session_phase(), user_id.as_deref());
        outcome
    }

    async fn init_from_provider(&self) -> Result<(), AuthError> {
        let provider = self.provider_name();
        let seconds = self.inner.settings.provider_init_timeout_seconds;

        match tokio::time::timeout(Duration::from_secs(seconds), self.inner.sso.init()).await {
            Ok(Ok(true)) => {
                LoggingHelper::log_provider_ready(provider, true);
                match self.on_sso_authenticated().await {
                    Err(AuthError::NotRegistered) => Err(AuthError::NotRegistered),
                    Err(e) => {
                        log::warn!("Signed in with {provider} but token exchange failed: {e}");
                        Ok(())
                    }
                    Ok(()) => Ok(()),
                }
            }
            Ok(Ok(false)) => {
                LoggingHelper::log_provider_ready(provider, false);
                self.update_state(|s| s.flags.is_sso_authenticated = false);
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("SSO provider {provider} failed to initialize: {e}");
                self.update_state(|s| s.flags.is_sso_authenticated = false);
                Ok(())
            }
            Err(_) => {
                LoggingHelper::log_provider_init_timeout(provider, seconds);
                self.update_state(|s| s.flags.is_sso_authenticated = false);
                Ok(())
            }
        }
    }

    /// Subscribe to provider transitions; the join handle is the unsubscribe handle
    fn start_listener(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.sso.subscribe();
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        AuthSessionManager { inner }
                            .handle_provider_change(change)
                            .await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {skipped} SSO provider events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    async fn handle_provider_change(&self, change: AuthChange) {
        LoggingHelper::log_provider_event(self.provider_name(), &format!("{change:?}"));

        match change {
            AuthChange::Authenticated => {
                if self.flags().is_sso_authenticated && self.is_authenticated() {
                    return;
                }
                if let Err(e) = self.on_sso_authenticated().await {
                    log::warn!("Token exchange after provider sign-in failed: {e}");
                }
            }
            AuthChange::TokenRefreshed => {
                self.update_state(|s| s.flags.is_sso_authenticated = true);
            }
            AuthChange::TokenExpired => {
                let renewed = self.inner.sso.refresh_token().await;
                if !renewed {
                    log::info!("SSO token expired and could not be renewed");
                }
                self.update_state(|s| s.flags.is_sso_authenticated = renewed);
            }
            AuthChange::Unauthenticated => {
                self.update_state(|s| s.flags.is_sso_authenticated = false);
            }
            AuthChange::LoggedOut => {
                // Our own logout already reset; a later login must survive the echo
                if self.flags().is_sso_authenticated {
                    self.reset_auth_state();
                } else {
                    log::debug!("Ignoring provider logout for a session that is already reset");
                }
            }
        }
    }

    /// SSO-authenticated: show provider profile fields, then exchange
    async fn on_sso_authenticated(&self) -> Result<(), AuthError> {
        self.update_state(|s| s.flags.is_sso_authenticated = true);
        self.load_sso_user_profile().await;
        self.exchange_token().await
    }
}

// =============================================================================
// 3. Token Acquisition
// =============================================================================

impl AuthSessionManager {
    /// Trade the provider's token for a first-party access token
    ///
    /// Resolves `Ok(())` without changing anything when the provider has no
    /// token. On success the token is stored before the profile load starts.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotRegistered`] when the backend answers 404
    /// - [`AuthError::Api`] for any other backend failure
    ///
    /// Both clear `is_authenticated`. Nothing is retried.
    pub async fn exchange_token(&self) -> Result<(), AuthError> {
        let Some(sso_token) = self.inner.sso.get_token().await else {
            LoggingHelper::log_backend_exchange("skipped");
            log::debug!("{}", AuthError::NoSsoToken);
            return Ok(());
        };

        match self.inner.api.exchange_token(&sso_token).await {
            Ok(grant) => {
                if let Err(e) = self.apply_grant(&grant) {
                    self.update_state(|s| s.flags.is_authenticated = false);
                    return Err(e);
                }
                LoggingHelper::log_backend_exchange("succeeded");
                self.load_user_profile().await;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                LoggingHelper::log_backend_exchange("user not registered");
                self.update_state(|s| s.flags.is_authenticated = false);
                Err(AuthError::NotRegistered)
            }
            Err(e) => {
                LoggingHelper::log_backend_exchange(&format!("failed: {e}"));
                self.update_state(|s| s.flags.is_authenticated = false);
                Err(AuthError::Api(e))
            }
        }
    }

    /// Store a first-party access token obtained outside the SSO flow
    ///
    /// Does not load the profile; call [`Self::load_user_profile`] next.
    /// `expires_in` defaults to `session.default_token_lifetime_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoAccessToken`] for a blank token
    pub fn set_access_token(&self, token: &str, expires_in: Option<u64>) -> Result<(), AuthError> {
        self.apply_grant(&TokenGrant {
            access_token: token.to_string(),
            expires_in,
            refresh_token: None,
        })
    }

    /// Log in with email and password, then load the profile
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Api`] when the backend rejects the credentials
    pub async fn login_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserProfile>, AuthError> {
        let grant = self.inner.api.login(email, password).await?;
        self.apply_grant(&grant)?;
        Ok(self.load_user_profile().await)
    }

    /// Create a first-party account, then sign in with the issued token
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Api`] when the backend rejects the registration
    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Option<UserProfile>, AuthError> {
        let grant = self.inner.api.register(request).await?;
        self.apply_grant(&grant)?;
        Ok(self.load_user_profile().await)
    }

    /// Start the provider's login redirect
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Sso`] if the redirect cannot be started
    pub async fn login(&self) -> Result<(), AuthError> {
        self.inner.sso.login().await.map_err(AuthError::from)
    }

    fn apply_grant(&self, grant: &TokenGrant) -> Result<(), AuthError> {
        let token = AccessToken::normalize(&grant.access_token).ok_or(AuthError::NoAccessToken)?;
        let lifetime = grant
            .expires_in
            .unwrap_or(self.inner.settings.default_token_lifetime_seconds);

        self.inner.store.set(ACCESS_TOKEN_KEY, token.as_str(), lifetime);
        if let Some(refresh_token) = grant.refresh_token.as_deref() {
            self.inner.store.set(REFRESH_TOKEN_KEY, refresh_token, lifetime);
        }

        // Authenticated only if the token is actually readable from the store
        let stored = self.stored_token().is_some();
        self.update_state(|s| s.flags.is_authenticated = stored);
        Ok(())
    }
}

// =============================================================================
// 4. Profile Loading
// =============================================================================

impl AuthSessionManager {
    /// Fetch the canonical profile from the backend and replace the cached one
    ///
    /// Returns the loaded profile, or `None` when there is no stored token or
    /// the load failed. Failures leave the previous profile in place; a
    /// 401/403 means the stored token is invalid and resets the session.
    pub async fn load_user_profile(&self) -> Option<UserProfile> {
        let Some(token) = self.stored_token() else {
            if !self.expire_if_token_missing() {
                log::debug!("Profile load skipped: {}", AuthError::NoAccessToken);
            }
            return None;
        };

        match self.inner.api.fetch_profile(token.as_str()).await {
            Ok(profile) => {
                // A reset or another login may have happened while fetching
                if self.stored_token().as_ref() != Some(&token) {
                    log::debug!("Discarding profile fetched for a replaced token");
                    return None;
                }
                LoggingHelper::log_profile_loaded("backend", &profile.id, profile.roles.len());
                let loaded = profile.clone();
                self.update_state(|s| s.user = Some(loaded));
                Some(profile)
            }
            Err(e) if e.is_unauthorized() => {
                log::warn!("Stored access token was rejected: {e}");
                self.reset_auth_state();
                None
            }
            Err(e) => {
                log::warn!("Failed to load user profile: {e}");
                None
            }
        }
    }

    /// Load the provider's view of the profile (token claims and user-info)
    ///
    /// The backend profile wins once an access token exists, so this only
    /// replaces the cached profile when none was loaded from the backend.
    pub async fn load_sso_user_profile(&self) -> Option<UserProfile> {
        let Some(profile) = self.inner.sso.get_user_profile().await else {
            log::debug!("{} has no user profile", self.provider_name());
            return None;
        };
        LoggingHelper::log_profile_loaded(self.provider_name(), &profile.id, profile.roles.len());

        let has_token = self.stored_token().is_some();
        let candidate = profile.clone();
        self.update_state(|s| {
            if !has_token || s.user.is_none() {
                s.user = Some(candidate);
            }
        });
        Some(profile)
    }

    /// Best-effort profile for callers rendering before `init` completes
    ///
    /// Loads directly with a stored token, otherwise tries an exchange first.
    /// Errors are swallowed; `None` means "not yet available".
    pub async fn ensure_profile_loaded(&self) -> Option<UserProfile> {
        if self.stored_token().is_some() {
            self.load_user_profile().await;
        } else {
            self.expire_if_token_missing();
            if let Err(e) = self.exchange_token().await {
                log::debug!("Profile not available yet: {e}");
            }
        }
        self.current_user()
    }
}

// =============================================================================
// 5. Teardown
// =============================================================================

impl AuthSessionManager {
    /// End the session
    ///
    /// The provider is asked to log out only when SSO-authenticated, and is
    /// given at most `session.logout_timeout_seconds`. The local reset always
    /// happens, whatever the provider does.
    pub async fn logout(&self, options: &LogoutOptions) {
        if self.flags().is_sso_authenticated {
            let provider = self.provider_name();
            let seconds = self.inner.settings.logout_timeout_seconds;
            match tokio::time::timeout(Duration::from_secs(seconds), self.inner.sso.logout(options))
                .await
            {
                Ok(Ok(())) => log::debug!("Provider {provider} logout completed"),
                Ok(Err(e)) => LoggingHelper::log_remote_logout_failed(provider, &e.to_string()),
                Err(_) => LoggingHelper::log_remote_logout_failed(
                    provider,
                    &format!("no answer within {seconds}s"),
                ),
            }
        }
        self.reset_auth_state();
    }

    /// Clear tokens, profile and both authenticated flags
    ///
    /// Synchronous and infallible. `is_initialized` is left as is.
    pub fn reset_auth_state(&self) {
        self.inner.store.delete(ACCESS_TOKEN_KEY);
        self.inner.store.delete(REFRESH_TOKEN_KEY);
        self.update_state(|s| {
            s.flags.is_authenticated = false;
            s.flags.is_sso_authenticated = false;
            s.flags.is_loading = false;
            s.user = None;
        });
        LoggingHelper::log_session_reset("local state cleared");
    }
}

// =============================================================================
// 6. Queries
// =============================================================================

impl AuthSessionManager {
    /// Role check against the provider's live profile
    ///
    /// Falls back to the cached profile when the provider has none (for
    /// example after a credential login).
    pub async fn has_role(&self, role: &str) -> bool {
        match self.inner.sso.get_user_profile().await {
            Some(profile) => profile.has_role(role),
            None => self.has_any_role_sync(&[role]),
        }
    }

    /// Like [`Self::has_role`] for any of `roles`
    pub async fn has_any_role<S: AsRef<str> + Sync>(&self, roles: &[S]) -> bool {
        match self.inner.sso.get_user_profile().await {
            Some(profile) => profile.has_any_role(roles),
            None => self.has_any_role_sync(roles),
        }
    }

    /// Role check against the cached profile, without I/O
    #[must_use]
    pub fn has_any_role_sync<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.read_state(|s| s.user.as_ref().is_some_and(|u| u.has_any_role(roles)))
    }

    /// Watch the published [`AuthState`]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.published.subscribe()
    }

    /// Current projection; an expired access token resets the session first
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.expire_if_token_missing();
        self.read_state(SessionState::projection)
    }

    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.read_state(|s| s.flags)
    }

    #[must_use]
    pub fn session_phase(&self) -> SessionPhase {
        self.expire_if_token_missing();
        self.flags().phase()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.flags().is_initialized
    }

    /// `true` only while the access token is still in the token store
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.expire_if_token_missing() && self.flags().is_authenticated
    }

    #[must_use]
    pub fn is_sso_authenticated(&self) -> bool {
        self.flags().is_sso_authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.flags().is_loading
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserProfile> {
        self.read_state(|s| s.user.clone())
    }

    /// Stored first-party access token, normalized
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.stored_token()
    }

    /// `Authorization` header value for first-party API requests
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        self.stored_token().map(|t| t.authorization_header())
    }
}

// =============================================================================
// 7. Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::ApiError;
    use crate::testing::{MemoryTokenStore, MockApiClient, MockSsoProvider, TestFixtures};

    fn manager(
        sso: &Arc<MockSsoProvider>,
        api: &Arc<MockApiClient>,
        store: &Arc<MemoryTokenStore>,
    ) -> AuthSessionManager {
        AuthSessionManager::new(
            ExecutionContext::Browser,
            TestFixtures::settings().session,
            sso.clone(),
            api.clone(),
            store.clone(),
        )
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(check(), "condition not reached");
    }

    #[tokio::test]
    async fn test_set_access_token_normalizes_and_authenticates() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);

        manager.set_access_token("Bearer abc", Some(120)).unwrap();

        assert!(manager.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("abc"));
        assert_eq!(store.max_age(ACCESS_TOKEN_KEY), Some(120));
        assert_eq!(manager.authorization_header().as_deref(), Some("Bearer abc"));
        // No implicit profile load
        assert!(api.profile_tokens().is_empty());
        assert!(manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_set_access_token_rejects_blank_and_uses_default_lifetime() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);

        assert_eq!(
            manager.set_access_token("Bearer  ", None),
            Err(AuthError::NoAccessToken)
        );
        assert!(!manager.is_authenticated());

        manager.set_access_token("abc", None).unwrap();
        assert_eq!(store.max_age(ACCESS_TOKEN_KEY), Some(3600));
    }

    #[tokio::test]
    async fn test_reset_clears_everything_but_initialized() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new().with_profile(Ok(TestFixtures::profile("1", &["bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "abc", 3600));
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();
        assert!(manager.current_user().is_some());

        manager.reset_auth_state();

        let state = manager.auth_state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(!store.contains(ACCESS_TOKEN_KEY));
        assert_eq!(manager.session_phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_has_any_role_sync_uses_cached_profile() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new().with_profile(Ok(TestFixtures::profile("1", &["admin", "bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "abc", 3600));
        let manager = manager(&sso, &api, &store);

        assert!(!manager.has_any_role_sync(&["admin"]));
        manager.init().await.unwrap();

        assert!(manager.has_any_role_sync(&["admin"]));
        assert!(!manager.has_any_role_sync(&["seller"]));
        assert!(!manager.has_any_role_sync::<&str>(&[]));
    }

    #[tokio::test]
    async fn test_async_role_checks_prefer_provider_profile() {
        let sso = Arc::new(
            MockSsoProvider::authenticated("sso").with_profile(TestFixtures::profile("1", &["seller"])),
        );
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::profile("1", &["bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();

        assert!(manager.has_role("seller").await);
        assert!(!manager.has_role("bidder").await);
        assert!(manager.has_any_role_sync(&["bidder"]));

        sso.set_session(None);
        assert!(manager.has_role("bidder").await);
        assert!(manager.has_any_role(&["bidder", "admin"]).await);
    }

    #[tokio::test]
    async fn test_rejected_token_resets_session() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new().with_profile(Err(MockApiClient::status(401))));
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "stale", 3600));
        let manager = manager(&sso, &api, &store);

        manager.init().await.unwrap();

        assert!(manager.is_initialized());
        assert!(!manager.is_authenticated());
        assert!(!store.contains(ACCESS_TOKEN_KEY));
    }

    #[tokio::test]
    async fn test_profile_failure_keeps_previous_profile() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new().with_profile(Ok(TestFixtures::profile("1", &["bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "abc", 3600));
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();

        api.set_profile(Err(MockApiClient::status(503)));
        assert!(manager.load_user_profile().await.is_none());

        assert_eq!(manager.current_user().unwrap().id, "1");
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_sso_profile_does_not_replace_backend_profile() {
        let sso = Arc::new(
            MockSsoProvider::authenticated("sso").with_profile(TestFixtures::profile("sso-id", &[])),
        );
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::profile("1", &["bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();
        assert_eq!(manager.current_user().unwrap().id, "1");

        assert_eq!(manager.load_sso_user_profile().await.unwrap().id, "sso-id");
        assert_eq!(manager.current_user().unwrap().id, "1");
    }

    #[tokio::test]
    async fn test_provider_sign_in_event_triggers_exchange() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::bidder_profile())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();
        assert!(!manager.is_authenticated());

        let mut state = manager.subscribe();
        sso.set_session(Some("sso-token"));
        sso.emit(AuthChange::Authenticated);

        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| s.is_authenticated && s.user.is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(api.exchanged_tokens(), vec!["sso-token"]);
        assert!(manager.is_sso_authenticated());
    }

    #[tokio::test]
    async fn test_expired_provider_token_clears_sso_flag_when_renewal_fails() {
        let sso = Arc::new(MockSsoProvider::authenticated("sso").with_refresh(false));
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::bidder_profile())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();
        assert_eq!(manager.session_phase(), SessionPhase::Authenticated);

        sso.emit(AuthChange::TokenExpired);

        eventually(|| !manager.is_sso_authenticated()).await;
        assert_eq!(sso.refresh_calls(), 1);
        // First-party session is independent of the provider token
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_provider_logout_event_resets_session() {
        let sso = Arc::new(MockSsoProvider::authenticated("sso"));
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::bidder_profile())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();

        sso.emit(AuthChange::LoggedOut);

        eventually(|| !manager.is_authenticated()).await;
        assert!(manager.current_user().is_none());
        assert!(!store.contains(ACCESS_TOKEN_KEY));
    }

    #[tokio::test]
    async fn test_missing_token_ends_session() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new().with_profile(Ok(TestFixtures::profile("1", &["bidder"]))),
        );
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "abc", 3600));
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();
        let mut state = manager.subscribe();
        assert!(state.borrow_and_update().is_authenticated);

        // Cookie expired or was cleared outside the manager
        store.delete(ACCESS_TOKEN_KEY);

        assert!(manager.load_user_profile().await.is_none());
        assert!(!manager.flags().is_authenticated);
        assert!(manager.current_user().is_none());
        assert!(state.has_changed().unwrap());
        assert!(!state.borrow_and_update().is_authenticated);
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_authenticated_query_checks_the_store() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.set_access_token("abc", Some(3600)).unwrap();
        assert!(manager.is_authenticated());

        store.delete(ACCESS_TOKEN_KEY);

        assert!(!manager.is_authenticated());
        assert!(!manager.auth_state().is_authenticated);
        assert_eq!(manager.session_phase(), SessionPhase::Uninitialized);
    }

    #[tokio::test]
    async fn test_stale_provider_logout_event_keeps_new_login() {
        let sso = Arc::new(MockSsoProvider::authenticated("sso"));
        let api = Arc::new(
            MockApiClient::new()
                .with_exchange(Ok(TestFixtures::token_grant("xyz", Some(3600))))
                .with_profile(Ok(TestFixtures::bidder_profile())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();

        manager.logout(&LogoutOptions::default()).await;
        manager.set_access_token("fresh", Some(3600)).unwrap();
        // Delivered after the local reset already happened
        sso.emit(AuthChange::LoggedOut);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_event_handling() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new());
        let store = Arc::new(MemoryTokenStore::with_entry(ACCESS_TOKEN_KEY, "abc", 3600));
        let manager = manager(&sso, &api, &store);
        manager.init().await.unwrap();

        manager.shutdown();
        sso.emit(AuthChange::LoggedOut);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_credential_login_and_registration() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(
            MockApiClient::new()
                .with_login(Err(ApiError::Envelope("Invalid credentials".to_string())))
                .with_register(Ok(TestFixtures::token_grant("new", None)))
                .with_profile(Ok(TestFixtures::bidder_profile())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);

        let err = manager
            .login_with_credentials("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Envelope(_))));
        assert!(!manager.is_authenticated());

        let request = RegistrationRequest {
            email: "ada@example.com".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };
        let profile = manager.register(&request).await.unwrap().unwrap();
        assert_eq!(profile.id, "1");
        assert!(manager.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("new"));
        assert_eq!(api.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_sso_login_delegates_to_provider() {
        let sso = Arc::new(MockSsoProvider::new());
        let api = Arc::new(MockApiClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&sso, &api, &store);

        manager.login().await.unwrap();
        assert_eq!(sso.login_calls(), 1);
    }
}
