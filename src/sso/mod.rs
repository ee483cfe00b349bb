//! Single-Sign-On provider abstraction
//!
//! The session manager talks to the external OpenID Connect identity service
//! only through [`SsoProvider`]. Asynchronous provider-side transitions (silent
//! renewal, expiry detected by the provider's own timer, logout) are delivered
//! as [`AuthChange`] messages on a broadcast channel.
//!
//! - [`oidc`] - Authorization-code + PKCE implementation over HTTP
//! - [`noop`] - Provider for contexts that cannot run a redirect flow
//! - [`claims`] - Token claim decoding and role extraction
//! - [`callback`] - Redirect callback detection and URL cleanup
//! - [`pkce`] - PKCE verifier/challenge and state generation

pub mod callback;
pub mod claims;
pub mod noop;
pub mod oidc;
pub mod pkce;

pub use callback::CallbackParams;
pub use noop::NoopSsoProvider;
pub use oidc::{OidcConfig, OidcEndpoints, OidcProvider};

use crate::models::auth::SsoError;
use crate::models::{LogoutOptions, UserProfile};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Provider-side authentication transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    /// The provider established a session
    Authenticated,
    /// The provider has no session
    Unauthenticated,
    /// Tokens were renewed in the background
    TokenRefreshed,
    /// Tokens expired and could not be renewed
    TokenExpired,
    /// The provider session was ended through `logout`
    LoggedOut,
}

impl AuthChange {
    /// Whether the provider is authenticated after this transition
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::TokenRefreshed)
    }
}

/// Browser navigation sink used for redirect-based flows
pub trait Navigator: Send + Sync {
    /// Current absolute location, if known
    fn current_url(&self) -> Option<String>;

    /// Navigate away (adds a history entry)
    fn assign(&self, url: &str);

    /// Rewrite the current location without a history entry
    fn replace(&self, url: &str);
}

/// External OpenID-Connect identity service as seen by the session manager
///
/// Every query resolves to a default failure value (`false` / `None`) when the
/// provider has no session, so callers never need error handling for the
/// "not logged in yet" case.
#[async_trait]
pub trait SsoProvider: Send + Sync {
    /// Initialize the provider and report whether it holds a session
    ///
    /// Completes a pending redirect callback (and cleans the callback
    /// parameters from the URL) before answering.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The discovery document cannot be fetched
    /// - The callback state does not match the pending login
    /// - The authorization code exchange fails
    async fn init(&self) -> Result<bool, SsoError>;

    async fn is_authenticated(&self) -> bool;

    /// Current provider access token, renewed first if it is about to expire
    async fn get_token(&self) -> Option<String>;

    /// Force a token renewal; `false` if no renewal was possible
    async fn refresh_token(&self) -> bool;

    /// Start the login redirect
    ///
    /// # Errors
    ///
    /// Returns an error if the authorization URL cannot be built
    async fn login(&self) -> Result<(), SsoError>;

    /// End the provider session and start the logout redirect
    ///
    /// # Errors
    ///
    /// Returns an error if the end-session URL cannot be built
    async fn logout(&self, options: &LogoutOptions) -> Result<(), SsoError>;

    /// Profile assembled from the provider's token claims and user-info endpoint
    async fn get_user_profile(&self) -> Option<UserProfile>;

    async fn has_role(&self, role: &str) -> bool {
        self.get_user_profile()
            .await
            .is_some_and(|profile| profile.has_role(role))
    }

    async fn has_any_role(&self, roles: &[String]) -> bool {
        self.get_user_profile()
            .await
            .is_some_and(|profile| profile.has_any_role(roles))
    }

    /// Subscribe to asynchronous provider-side transitions
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Get the provider name for logging and identification
    fn service_name(&self) -> &'static str;
}
