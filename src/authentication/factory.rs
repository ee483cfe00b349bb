//! Service factory for creating a configured authentication session
//!
//! This module selects the [`TokenStore`] and [`SsoProvider`] strategies for the
//! configured execution context and wires them into an [`AuthSessionManager`].

use crate::api::{ApiClient, HttpApiClient};
use crate::models::auth::AuthError;
use crate::session::{AuthGuard, AuthSessionManager, GuestGuard, RedirectMemory};
use crate::settings::{ApplicationSettings, BidgateSettings, ExecutionContext};
use crate::sso::{Navigator, NoopSsoProvider, OidcConfig, OidcProvider, SsoProvider};
use crate::token_store::{CookieTokenStore, NoopTokenStore, TokenStore};
use std::sync::Arc;

/// Everything the application needs from the authentication layer
pub struct SessionServices {
    pub manager: AuthSessionManager,
    /// Browser cookie jar, for hydrating from and rendering to HTTP headers
    pub cookies: Option<Arc<CookieTokenStore>>,
    pub redirect_memory: Arc<RedirectMemory>,
    application: ApplicationSettings,
}

impl SessionServices {
    #[must_use]
    pub fn auth_guard(&self) -> AuthGuard {
        AuthGuard::new(
            self.manager.clone(),
            Arc::clone(&self.redirect_memory),
            &self.application,
        )
    }

    #[must_use]
    pub fn guest_guard(&self) -> GuestGuard {
        GuestGuard::new(self.manager.clone(), &self.application)
    }
}

/// Factory for creating authentication services with dependency injection
pub struct AuthenticationServiceFactory;

impl AuthenticationServiceFactory {
    /// Create the session manager and its companions for `settings`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - SSO is enabled in the browser context without a client id
    /// - An HTTP client cannot be built
    pub fn create_session_services(
        settings: &BidgateSettings,
        navigator: Arc<dyn Navigator>,
    ) -> Result<SessionServices, AuthError> {
        log::info!("🏭 Starting authentication service factory...");
        let context = settings.application.context;

        let api: Arc<dyn ApiClient> = Arc::new(HttpApiClient::from_settings(&settings.api)?);
        let (store, cookies) = Self::token_store(settings);
        let sso = Self::sso_provider(settings, navigator, Arc::clone(&store))?;

        let manager = AuthSessionManager::new(context, settings.session.clone(), sso, api, store);
        log::info!(
            "🏭 Authentication service factory completed ({context:?} context, {} provider)",
            manager.provider_name()
        );

        Ok(SessionServices {
            manager,
            cookies,
            redirect_memory: Arc::new(RedirectMemory::new()),
            application: settings.application.clone(),
        })
    }

    fn token_store(
        settings: &BidgateSettings,
    ) -> (Arc<dyn TokenStore>, Option<Arc<CookieTokenStore>>) {
        match settings.application.context {
            ExecutionContext::Browser => {
                let cookies = Arc::new(CookieTokenStore::from_settings(&settings.cookies));
                log::info!(
                    "✅ Cookie token store configured (secure={}, path={})",
                    settings.cookies.secure,
                    settings.cookies.path
                );
                let store: Arc<dyn TokenStore> = cookies.clone();
                (store, Some(cookies))
            }
            ExecutionContext::Server => {
                log::info!("⚠️  No client storage in server context, tokens are not persisted");
                let store: Arc<dyn TokenStore> = Arc::new(NoopTokenStore);
                (store, None)
            }
        }
    }

    fn sso_provider(
        settings: &BidgateSettings,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Arc<dyn SsoProvider>, AuthError> {
        if settings.application.context == ExecutionContext::Server {
            return Ok(Arc::new(NoopSsoProvider::new()));
        }
        if !settings.sso.enabled {
            log::info!("⚠️  SSO authentication is disabled");
            return Ok(Arc::new(NoopSsoProvider::new()));
        }

        let config = OidcConfig::from_settings(&settings.sso)?;
        log::info!("✅ OIDC provider configured for client {}", config.client_id);
        log::info!("   └─ Discovery: {}", config.discovery_url);
        Ok(Arc::new(OidcProvider::new(config, navigator, store)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::SsoError;
    use crate::testing::{RecordingNavigator, TestFixtures};

    fn navigator() -> Arc<dyn Navigator> {
        Arc::new(RecordingNavigator::new(None))
    }

    #[test]
    fn test_browser_context_uses_cookies_and_oidc() {
        let services =
            AuthenticationServiceFactory::create_session_services(&TestFixtures::settings(), navigator())
                .unwrap();

        assert_eq!(services.manager.context(), ExecutionContext::Browser);
        assert_eq!(services.manager.provider_name(), "oidc");
        assert!(services.cookies.is_some());
    }

    #[test]
    fn test_server_context_uses_noop_strategies() {
        let services = AuthenticationServiceFactory::create_session_services(
            &TestFixtures::server_settings(),
            navigator(),
        )
        .unwrap();

        assert_eq!(services.manager.context(), ExecutionContext::Server);
        assert_eq!(services.manager.provider_name(), "noop");
        assert!(services.cookies.is_none());
    }

    #[test]
    fn test_disabled_sso_uses_noop_provider() {
        let mut settings = TestFixtures::settings();
        settings.sso.enabled = false;
        settings.sso.client_id = None;

        let services =
            AuthenticationServiceFactory::create_session_services(&settings, navigator()).unwrap();
        assert_eq!(services.manager.provider_name(), "noop");
    }

    #[test]
    fn test_missing_client_id_is_a_configuration_error() {
        let mut settings = TestFixtures::settings();
        settings.sso.client_id = None;

        let result = AuthenticationServiceFactory::create_session_services(&settings, navigator());
        assert!(matches!(
            result.err(),
            Some(AuthError::Sso(SsoError::Configuration(_)))
        ));
    }

    #[tokio::test]
    async fn test_cookie_store_is_shared_with_manager() {
        let services =
            AuthenticationServiceFactory::create_session_services(&TestFixtures::settings(), navigator())
                .unwrap();

        services.manager.set_access_token("abc", Some(60)).unwrap();

        let cookies = services.cookies.as_ref().unwrap();
        assert_eq!(cookies.get("access_token").as_deref(), Some("abc"));
        assert!(cookies
            .set_cookie_headers()
            .iter()
            .any(|h| h.starts_with("access_token=abc")));
    }
}
