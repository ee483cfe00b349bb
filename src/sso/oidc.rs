//! OpenID Connect authorization-code provider with PKCE
//!
//! Login is a full-page redirect to the identity service. On return, `init`
//! recognizes the callback parameters, checks `state` against the pending login
//! kept in the [`TokenStore`], exchanges the code and rewrites the location
//! without the callback parameters. Provider tokens live in memory only and are
//! renewed by a background timer shortly before they expire.

use super::callback::{clean_url, CallbackParams};
use super::claims::{combined_claims, merge_missing, profile_from_claims};
use super::pkce::{generate_code_challenge, generate_code_verifier, generate_state};
use super::{AuthChange, Navigator, SsoProvider};
use crate::models::auth::SsoError;
use crate::models::{LogoutOptions, UserProfile};
use crate::settings::SsoSettings;
use crate::token_store::TokenStore;
use crate::utils::logging::LoggingHelper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;

/// Token-store key holding the in-flight authorization request
pub const PENDING_LOGIN_KEY: &str = "oidc_pending_login";
const PENDING_LOGIN_MAX_AGE_SECONDS: u64 = 600;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 16;
/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 300;
const PROVIDER_NAME: &str = "oidc";
/// Shortest wait between background renewals
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(5);

/// Client registration and behavior of an [`OidcProvider`]
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub discovery_url: String,
    /// Renew the access token when it expires within this window
    pub min_validity: chrono::Duration,
}

impl OidcConfig {
    /// Build the provider configuration from settings
    ///
    /// # Errors
    ///
    /// Returns an error if no client id is configured
    pub fn from_settings(settings: &SsoSettings) -> Result<Self, SsoError> {
        let client_id = settings
            .get_client_id()
            .ok_or_else(|| SsoError::Configuration("SSO client id not configured".to_string()))?;

        Ok(Self {
            client_id,
            redirect_uri: settings.redirect_uri.clone(),
            post_logout_redirect_uri: settings.post_logout_redirect_uri.clone(),
            scopes: settings.scopes.clone(),
            discovery_url: settings.get_discovery_url(),
            min_validity: chrono::Duration::seconds(
                i64::try_from(settings.min_token_validity_seconds).unwrap_or(i64::from(u32::MAX)),
            ),
        })
    }
}

/// Endpoints published in the discovery document
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OidcEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct ProviderTokens {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl ProviderTokens {
    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        let lifetime = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .unwrap_or(DEFAULT_EXPIRES_IN_SECONDS)
            .min(i64::from(u32::MAX));

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            id_token: response.id_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    fn expires_within(&self, window: chrono::Duration) -> bool {
        self.expires_at - window <= Utc::now()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingLogin {
    state: String,
    code_verifier: String,
}

struct OidcInner {
    config: OidcConfig,
    http_client: reqwest::Client,
    navigator: Arc<dyn Navigator>,
    store: Arc<dyn TokenStore>,
    endpoints: OnceCell<OidcEndpoints>,
    tokens: RwLock<Option<ProviderTokens>>,
    profile: RwLock<Option<UserProfile>>,
    events: broadcast::Sender<AuthChange>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for OidcInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Authorization-code + PKCE client for an OpenID Connect identity service
#[derive(Clone)]
pub struct OidcProvider {
    inner: Arc<OidcInner>,
}

impl OidcProvider {
    /// Create a provider that resolves its endpoints from the discovery document
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        config: OidcConfig,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, SsoError> {
        Self::build(config, OnceCell::new(), navigator, store)
    }

    /// Create a provider with known endpoints, skipping discovery
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn with_endpoints(
        config: OidcConfig,
        endpoints: OidcEndpoints,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, SsoError> {
        Self::build(config, OnceCell::new_with(Some(endpoints)), navigator, store)
    }

    fn build(
        config: OidcConfig,
        endpoints: OnceCell<OidcEndpoints>,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, SsoError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SsoError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(OidcInner {
                config,
                http_client,
                navigator,
                store,
                endpoints,
                tokens: RwLock::new(None),
                profile: RwLock::new(None),
                events,
                refresh_task: Mutex::new(None),
            }),
        })
    }

    async fn endpoints(&self) -> Result<&OidcEndpoints, SsoError> {
        self.inner
            .endpoints
            .get_or_try_init(|| self.fetch_discovery())
            .await
    }

    async fn fetch_discovery(&self) -> Result<OidcEndpoints, SsoError> {
        let url = &self.inner.config.discovery_url;
        let response = self
            .inner
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| SsoError::Network(format!("Discovery request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SsoError::InvalidResponse(format!(
                "Discovery document returned status {status}"
            )));
        }

        let endpoints: OidcEndpoints = response
            .json()
            .await
            .map_err(|e| SsoError::InvalidResponse(format!("Invalid discovery document: {e}")))?;
        LoggingHelper::log_discovery_resolved(
            &endpoints.issuer,
            endpoints.end_session_endpoint.is_some(),
        );
        Ok(endpoints)
    }

    fn authorization_url(
        &self,
        endpoints: &OidcEndpoints,
        pending: &PendingLogin,
    ) -> Result<String, SsoError> {
        let config = &self.inner.config;
        let scopes = config.scopes.join(" ");
        let mut url = url::Url::parse(&endpoints.authorization_endpoint).map_err(|e| {
            SsoError::Configuration(format!("Invalid authorization endpoint: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes)
            .append_pair("state", &pending.state)
            .append_pair("code_challenge", &generate_code_challenge(&pending.code_verifier))
            .append_pair("code_challenge_method", "S256");

        LoggingHelper::log_authorization_redirect(&config.client_id, &scopes);
        Ok(url.to_string())
    }

    fn end_session_url(
        &self,
        endpoint: &str,
        id_token: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<String, SsoError> {
        let mut url = url::Url::parse(endpoint)
            .map_err(|e| SsoError::Configuration(format!("Invalid end-session endpoint: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.inner.config.client_id);
            if let Some(id_token) = id_token {
                query.append_pair("id_token_hint", id_token);
            }
            if let Some(redirect_uri) = redirect_uri {
                query.append_pair("post_logout_redirect_uri", redirect_uri);
            }
        }
        Ok(url.to_string())
    }

    fn take_pending_login(&self) -> Option<PendingLogin> {
        let raw = self.inner.store.get(PENDING_LOGIN_KEY)?;
        self.inner.store.delete(PENDING_LOGIN_KEY);
        serde_json::from_str(&raw)
            .map_err(|e| log::warn!("Discarding unreadable pending login: {e}"))
            .ok()
    }

    async fn complete_callback(
        &self,
        location: &str,
        params: CallbackParams,
    ) -> Result<bool, SsoError> {
        let cleaned = clean_url(location);
        let pending = self.take_pending_login();

        if let Some(error) = params.error {
            self.inner.navigator.replace(&cleaned);
            log::warn!(
                "SSO login returned error '{}': {}",
                error,
                params.error_description.as_deref().unwrap_or("no description")
            );
            return Ok(false);
        }

        let (Some(code), Some(state)) = (params.code, params.state) else {
            self.inner.navigator.replace(&cleaned);
            return Ok(false);
        };

        let Some(pending) = pending.filter(|p| p.state == state) else {
            self.inner.navigator.replace(&cleaned);
            return Err(SsoError::Callback(
                "state does not match the pending login".to_string(),
            ));
        };

        let endpoints = self.endpoints().await?;
        LoggingHelper::log_code_exchange_start(PROVIDER_NAME);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.inner.config.redirect_uri.as_str()),
            ("client_id", self.inner.config.client_id.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];
        let result = self.request_tokens(&endpoints.token_endpoint, &form).await;
        self.inner.navigator.replace(&cleaned);

        let response = result?;
        self.install_tokens(ProviderTokens::from_response(response, None));
        Ok(true)
    }

    async fn request_tokens(
        &self,
        token_endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, SsoError> {
        let response = self
            .inner
            .http_client
            .post(token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| SsoError::Network(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SsoError::InvalidResponse(format!(
                "Token endpoint returned status {status}: {error_text}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SsoError::InvalidResponse(format!("Failed to parse token response: {e}")))?;

        LoggingHelper::log_token_response_summary(
            PROVIDER_NAME,
            token_response.refresh_token.as_ref(),
            token_response.id_token.as_ref(),
            token_response.expires_in,
        );
        Ok(token_response)
    }

    fn current_tokens(&self) -> Option<ProviderTokens> {
        self.inner
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_tokens(&self, tokens: ProviderTokens) {
        *self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        *self
            .inner
            .profile
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.spawn_refresh_timer();
    }

    fn clear_tokens(&self) -> Option<ProviderTokens> {
        self.cancel_refresh();
        *self
            .inner
            .profile
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn cancel_refresh(&self) {
        if let Some(handle) = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Renew tokens shortly before expiry; announce expiry if renewal fails
    fn spawn_refresh_timer(&self) {
        let Some(tokens) = self.current_tokens() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No runtime available, background token renewal disabled");
            return;
        };

        let delay = refresh_delay(tokens.expires_at, self.inner.config.min_validity, Utc::now());
        let weak: Weak<OidcInner> = Arc::downgrade(&self.inner);

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let provider = OidcProvider { inner };
            // The successful path reschedules through install_tokens
            provider.detach_refresh_task();
            if !provider.refresh_token().await {
                provider.clear_tokens();
                let _ = provider.inner.events.send(AuthChange::TokenExpired);
            }
        });

        if let Some(previous) = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Forget the running timer handle without aborting the current task
    fn detach_refresh_task(&self) {
        drop(
            self.inner
                .refresh_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Option<serde_json::Value> {
        let endpoint = self.inner.endpoints.get()?.userinfo_endpoint.clone()?;
        let response = self
            .inner
            .http_client
            .get(&endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| log::debug!("User-info request failed: {e}"))
            .ok()?;

        if !response.status().is_success() {
            log::debug!("User-info endpoint returned status {}", response.status());
            return None;
        }
        response
            .json()
            .await
            .map_err(|e| log::debug!("Invalid user-info response: {e}"))
            .ok()
    }

    async fn revoke(&self, endpoints: &OidcEndpoints, tokens: &ProviderTokens) {
        let Some(revocation_endpoint) = endpoints.revocation_endpoint.as_deref() else {
            return;
        };
        let (token, hint) = tokens.refresh_token.as_deref().map_or(
            (tokens.access_token.as_str(), "access_token"),
            |refresh| (refresh, "refresh_token"),
        );
        let form = [
            ("token", token),
            ("token_type_hint", hint),
            ("client_id", self.inner.config.client_id.as_str()),
        ];

        match self
            .inner
            .http_client
            .post(revocation_endpoint)
            .form(&form)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                log::debug!("Revoked provider {hint}");
            }
            Ok(response) => log::warn!("Token revocation returned status {}", response.status()),
            Err(e) => log::warn!("Token revocation failed: {e}"),
        }
    }
}

/// Wait before renewing a token that expires at `expires_at`
///
/// Renews `min_validity` ahead of expiry, but never later than half-way
/// through the remaining lifetime and never sooner than [`MIN_REFRESH_DELAY`],
/// so an identity service issuing very short tokens cannot drive a busy loop.
fn refresh_delay(
    expires_at: DateTime<Utc>,
    min_validity: chrono::Duration,
    now: DateTime<Utc>,
) -> Duration {
    let remaining = expires_at - now;
    let lead = min_validity.min(remaining / 2);
    (remaining - lead)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(MIN_REFRESH_DELAY)
}

#[async_trait]
impl SsoProvider for OidcProvider {
    async fn init(&self) -> Result<bool, SsoError> {
        if let Some(location) = self.inner.navigator.current_url() {
            if let Some(params) = CallbackParams::from_url(&location) {
                return self.complete_callback(&location, params).await;
            }
        }
        Ok(self.is_authenticated().await)
    }

    async fn is_authenticated(&self) -> bool {
        self.current_tokens().is_some_and(|tokens| !tokens.is_expired())
    }

    async fn get_token(&self) -> Option<String> {
        let tokens = self.current_tokens()?;
        if !tokens.expires_within(self.inner.config.min_validity) {
            return Some(tokens.access_token);
        }

        if self.refresh_token().await {
            return self.current_tokens().map(|t| t.access_token);
        }
        // Renewal failed; a token that has not expired yet is still usable
        (!tokens.is_expired()).then_some(tokens.access_token)
    }

    async fn refresh_token(&self) -> bool {
        let Some(refresh_token) = self.current_tokens().and_then(|t| t.refresh_token) else {
            return false;
        };
        let endpoints = match self.endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                log::warn!("Token renewal unavailable: {e}");
                return false;
            }
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.inner.config.client_id.as_str()),
        ];
        match self.request_tokens(&endpoints.token_endpoint, &form).await {
            Ok(response) => {
                self.install_tokens(ProviderTokens::from_response(response, Some(refresh_token)));
                let _ = self.inner.events.send(AuthChange::TokenRefreshed);
                true
            }
            Err(e) => {
                log::warn!("Token renewal failed: {e}");
                false
            }
        }
    }

    async fn login(&self) -> Result<(), SsoError> {
        let endpoints = self.endpoints().await?;
        let pending = PendingLogin {
            state: generate_state(),
            code_verifier: generate_code_verifier(),
        };
        let auth_url = self.authorization_url(endpoints, &pending)?;

        let serialized = serde_json::to_string(&pending)
            .map_err(|e| SsoError::Configuration(format!("Failed to store pending login: {e}")))?;
        self.inner
            .store
            .set(PENDING_LOGIN_KEY, &serialized, PENDING_LOGIN_MAX_AGE_SECONDS);

        self.inner.navigator.assign(&auth_url);
        Ok(())
    }

    async fn logout(&self, options: &LogoutOptions) -> Result<(), SsoError> {
        let tokens = self.clear_tokens();
        let _ = self.inner.events.send(AuthChange::LoggedOut);

        if !options.revoke_tokens && !options.redirect {
            return Ok(());
        }

        let endpoints = self.endpoints().await?;
        if options.revoke_tokens {
            if let Some(tokens) = tokens.as_ref() {
                self.revoke(endpoints, tokens).await;
            }
        }

        if options.redirect {
            let redirect_uri = options
                .redirect_uri
                .as_deref()
                .or(self.inner.config.post_logout_redirect_uri.as_deref());
            match endpoints.end_session_endpoint.as_deref() {
                Some(endpoint) => {
                    let id_token = tokens.as_ref().and_then(|t| t.id_token.as_deref());
                    let url = self.end_session_url(endpoint, id_token, redirect_uri)?;
                    self.inner.navigator.assign(&url);
                }
                None => {
                    if let Some(redirect_uri) = redirect_uri {
                        self.inner.navigator.assign(redirect_uri);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_user_profile(&self) -> Option<UserProfile> {
        if let Some(profile) = self
            .inner
            .profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Some(profile);
        }

        let tokens = self.current_tokens().filter(|t| !t.is_expired())?;
        let mut claims = combined_claims(&tokens.access_token, tokens.id_token.as_deref());
        if let Some(userinfo) = self.fetch_userinfo(&tokens.access_token).await {
            merge_missing(&mut claims, &userinfo);
        }

        let profile = profile_from_claims(&claims)?;
        *self
            .inner
            .profile
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(profile.clone());
        Some(profile)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.inner.events.subscribe()
    }

    fn service_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthSessionManager;
    use crate::settings::ExecutionContext;
    use crate::testing::{MemoryTokenStore, MockApiClient, RecordingNavigator, TestFixtures};
    use crate::token_store::ACCESS_TOKEN_KEY;

    fn endpoints() -> OidcEndpoints {
        OidcEndpoints {
            issuer: "https://id.example.com/realms/market".to_string(),
            authorization_endpoint: "https://id.example.com/auth".to_string(),
            token_endpoint: "https://id.example.com/token".to_string(),
            userinfo_endpoint: None,
            end_session_endpoint: Some("https://id.example.com/logout".to_string()),
            revocation_endpoint: None,
        }
    }

    fn config() -> OidcConfig {
        OidcConfig {
            client_id: "marketplace-web".to_string(),
            redirect_uri: "https://market.example.com/".to_string(),
            post_logout_redirect_uri: Some("https://market.example.com/bye".to_string()),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            discovery_url: "https://id.example.com/.well-known/openid-configuration".to_string(),
            min_validity: chrono::Duration::seconds(30),
        }
    }

    fn provider(
        location: Option<&str>,
    ) -> (OidcProvider, Arc<RecordingNavigator>, Arc<MemoryTokenStore>) {
        let navigator = Arc::new(RecordingNavigator::new(location));
        let store = Arc::new(MemoryTokenStore::new());
        let provider =
            OidcProvider::with_endpoints(config(), endpoints(), navigator.clone(), store.clone())
                .unwrap();
        (provider, navigator, store)
    }

    fn install(provider: &OidcProvider, access_token: &str, expires_in: i64) {
        *provider.inner.tokens.write().unwrap() = Some(ProviderTokens {
            access_token: access_token.to_string(),
            refresh_token: None,
            id_token: None,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        });
    }

    #[tokio::test]
    async fn test_login_redirects_with_pkce() {
        let (provider, navigator, store) = provider(Some("https://market.example.com/"));

        provider.login().await.unwrap();

        let assigned = navigator.assigned();
        assert_eq!(assigned.len(), 1);
        let url = url::Url::parse(&assigned[0]).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "marketplace-web");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "openid profile");
        assert_eq!(query["code_challenge_method"], "S256");

        let pending: PendingLogin =
            serde_json::from_str(&store.get(PENDING_LOGIN_KEY).unwrap()).unwrap();
        assert_eq!(query["state"], pending.state);
        assert_eq!(
            query["code_challenge"],
            generate_code_challenge(&pending.code_verifier)
        );
    }

    #[tokio::test]
    async fn test_init_without_callback_reports_no_session() {
        let (provider, navigator, _) = provider(Some("https://market.example.com/auctions"));

        assert!(!provider.init().await.unwrap());
        assert!(navigator.assigned().is_empty());
        assert!(navigator.replaced().is_empty());
    }

    #[tokio::test]
    async fn test_init_with_error_callback_cleans_url() {
        let (provider, navigator, store) = provider(Some(
            "https://market.example.com/?error=access_denied&state=abc",
        ));
        store.set(PENDING_LOGIN_KEY, r#"{"state":"abc","code_verifier":"v"}"#, 600);

        assert!(!provider.init().await.unwrap());
        assert_eq!(navigator.replaced(), vec!["https://market.example.com/"]);
        assert!(store.get(PENDING_LOGIN_KEY).is_none());
    }

    #[tokio::test]
    async fn test_init_rejects_state_mismatch() {
        let (provider, navigator, store) = provider(Some(
            "https://market.example.com/auctions?code=c&state=forged",
        ));
        store.set(PENDING_LOGIN_KEY, r#"{"state":"expected","code_verifier":"v"}"#, 600);

        let err = provider.init().await.unwrap_err();
        assert!(matches!(err, SsoError::Callback(_)));
        assert_eq!(
            navigator.replaced(),
            vec!["https://market.example.com/auctions"]
        );
        assert!(!provider.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_tokens_and_profile_from_claims() {
        let (provider, _, _) = provider(None);
        assert!(provider.get_token().await.is_none());
        assert!(provider.get_user_profile().await.is_none());

        let token = TestFixtures::sso_jwt("f3a1", &["bidder"]);
        install(&provider, &token, 3600);

        assert!(provider.is_authenticated().await);
        assert_eq!(provider.get_token().await.as_deref(), Some(token.as_str()));
        let profile = provider.get_user_profile().await.unwrap();
        assert_eq!(profile.id, "f3a1");
        assert!(provider.has_role("bidder").await);
        assert!(!provider.has_any_role(&["admin".to_string()]).await);
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_is_unavailable() {
        let (provider, _, _) = provider(None);
        install(&provider, "stale", -5);

        assert!(!provider.is_authenticated().await);
        assert!(!provider.refresh_token().await);
        assert!(provider.get_token().await.is_none());
    }

    #[tokio::test]
    async fn test_token_near_expiry_still_served_when_renewal_impossible() {
        let (provider, _, _) = provider(None);
        install(&provider, "short-lived", 10);

        assert_eq!(provider.get_token().await.as_deref(), Some("short-lived"));
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_and_redirects_to_end_session() {
        let (provider, navigator, _) = provider(None);
        let mut events = provider.subscribe();
        install(&provider, "token", 3600);

        provider.logout(&LogoutOptions::default()).await.unwrap();

        assert!(!provider.is_authenticated().await);
        assert_eq!(events.recv().await.unwrap(), AuthChange::LoggedOut);
        let assigned = navigator.assigned();
        assert_eq!(assigned.len(), 1);
        assert!(assigned[0].starts_with("https://id.example.com/logout?"));
        assert!(assigned[0].contains("post_logout_redirect_uri=https%3A%2F%2Fmarket.example.com%2Fbye"));
    }

    #[tokio::test]
    async fn test_logout_without_redirect_stays_put() {
        let (provider, navigator, _) = provider(None);
        let options = LogoutOptions {
            redirect: false,
            ..Default::default()
        };

        provider.logout(&options).await.unwrap();
        assert!(navigator.assigned().is_empty());
    }

    #[test]
    fn test_refresh_delay_has_a_floor() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(30);

        // Long-lived token: renew 30s ahead of expiry
        assert_eq!(
            refresh_delay(now + chrono::Duration::seconds(300), window, now),
            Duration::from_secs(270)
        );
        // Lifetime equal to the window: renew half-way instead of immediately
        assert_eq!(
            refresh_delay(now + chrono::Duration::seconds(30), window, now),
            Duration::from_secs(15)
        );
        // Very short or already expired tokens still wait the minimum
        assert_eq!(
            refresh_delay(now + chrono::Duration::seconds(4), window, now),
            MIN_REFRESH_DELAY
        );
        assert_eq!(
            refresh_delay(now - chrono::Duration::seconds(10), window, now),
            MIN_REFRESH_DELAY
        );
    }

    #[test]
    fn test_config_requires_client_id() {
        let settings = SsoSettings::default();
        assert!(matches!(
            OidcConfig::from_settings(&settings),
            Err(SsoError::Configuration(_))
        ));

        let settings = SsoSettings {
            client_id: Some("marketplace-web".to_string()),
            ..Default::default()
        };
        let config = OidcConfig::from_settings(&settings).unwrap();
        assert_eq!(config.min_validity, chrono::Duration::seconds(30));
        assert!(config.discovery_url.ends_with("/.well-known/openid-configuration"));
    }

    #[test]
    fn test_discovery_document_parsing() {
        let endpoints: OidcEndpoints = serde_json::from_value(serde_json::json!({
            "issuer": "https://id.example.com",
            "authorization_endpoint": "https://id.example.com/auth",
            "token_endpoint": "https://id.example.com/token",
            "jwks_uri": "https://id.example.com/certs"
        }))
        .unwrap();
        assert!(endpoints.end_session_endpoint.is_none());
        assert!(endpoints.userinfo_endpoint.is_none());
    }

    fn session_over(provider: &OidcProvider) -> (AuthSessionManager, Arc<MemoryTokenStore>) {
        let api = MockApiClient::new()
            .with_exchange(Ok(TestFixtures::token_grant("first-party", Some(3600))))
            .with_profile(Ok(TestFixtures::bidder_profile()));
        let store = Arc::new(MemoryTokenStore::new());
        let manager = AuthSessionManager::new(
            ExecutionContext::Browser,
            TestFixtures::settings().session,
            Arc::new(provider.clone()),
            Arc::new(api),
            store.clone(),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_logout_event_does_not_undo_next_login() {
        let (provider, _, _) = provider(None);
        install(&provider, &TestFixtures::sso_jwt("f3a1", &["bidder"]), 3600);
        let (manager, store) = session_over(&provider);
        manager.init().await.unwrap();
        assert!(manager.is_sso_authenticated());
        assert!(manager.is_authenticated());

        let options = LogoutOptions {
            redirect: false,
            ..Default::default()
        };
        manager.logout(&options).await;
        manager.set_access_token("fresh", Some(3600)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_provider_side_logout_ends_session() {
        let (provider, _, _) = provider(None);
        install(&provider, &TestFixtures::sso_jwt("f3a1", &["bidder"]), 3600);
        let (manager, store) = session_over(&provider);
        manager.init().await.unwrap();

        let options = LogoutOptions {
            redirect: false,
            ..Default::default()
        };
        provider.logout(&options).await.unwrap();

        for _ in 0..100 {
            if !manager.is_authenticated() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.is_authenticated());
        assert!(!manager.is_sso_authenticated());
        assert!(store.get(ACCESS_TOKEN_KEY).is_none());
    }
}
