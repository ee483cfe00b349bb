use super::{AuthChange, SsoProvider};
use crate::models::auth::SsoError;
use crate::models::{LogoutOptions, UserProfile};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Provider for contexts where SSO is disabled or cannot run
///
/// Always unauthenticated. `login` fails because there is nowhere to redirect;
/// `logout` succeeds because there is nothing to end.
#[derive(Debug, Clone)]
pub struct NoopSsoProvider {
    events: broadcast::Sender<AuthChange>,
}

impl NoopSsoProvider {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for NoopSsoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SsoProvider for NoopSsoProvider {
    async fn init(&self) -> Result<bool, SsoError> {
        Ok(false)
    }

    async fn is_authenticated(&self) -> bool {
        false
    }

    async fn get_token(&self) -> Option<String> {
        None
    }

    async fn refresh_token(&self) -> bool {
        false
    }

    async fn login(&self) -> Result<(), SsoError> {
        Err(SsoError::Unavailable)
    }

    async fn logout(&self, _options: &LogoutOptions) -> Result<(), SsoError> {
        Ok(())
    }

    async fn get_user_profile(&self) -> Option<UserProfile> {
        None
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    fn service_name(&self) -> &'static str {
        "noop"
    }
}
