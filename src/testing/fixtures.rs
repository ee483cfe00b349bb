//! Test fixtures providing pre-built test objects

use crate::api::TokenGrant;
use crate::models::UserProfile;
use crate::settings::{BidgateSettings, ExecutionContext};
use base64::{engine::general_purpose, Engine as _};

use super::constants::{TEST_CLIENT_ID, TEST_EMAIL, TEST_ORIGIN};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Backend profile with the given id and roles
    #[must_use]
    pub fn profile(id: &str, roles: &[&str]) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            roles: roles.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    /// Fully populated bidder profile
    #[must_use]
    pub fn bidder_profile() -> UserProfile {
        UserProfile {
            id: "1".to_string(),
            username: Some("ada".to_string()),
            email: Some(TEST_EMAIL.to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            full_name: Some("Ada Lovelace".to_string()),
            roles: vec!["bidder".to_string()],
            ..Default::default()
        }
    }

    /// Backend token grant
    #[must_use]
    pub fn token_grant(access_token: &str, expires_in: Option<u64>) -> TokenGrant {
        TokenGrant {
            access_token: access_token.to_string(),
            expires_in,
            refresh_token: None,
        }
    }

    /// Unsigned JWT whose claims carry `sub` and realm roles
    #[must_use]
    pub fn sso_jwt(subject: &str, roles: &[&str]) -> String {
        let claims = serde_json::json!({
            "sub": subject,
            "email": TEST_EMAIL,
            "preferred_username": "ada",
            "exp": chrono::Utc::now().timestamp() + 3600,
            "realm_access": { "roles": roles },
        });
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    /// Browser-context settings with a configured SSO client
    #[must_use]
    pub fn settings() -> BidgateSettings {
        let mut settings = BidgateSettings::default();
        settings.application.context = ExecutionContext::Browser;
        settings.sso.client_id = Some(TEST_CLIENT_ID.to_string());
        settings.sso.redirect_uri = format!("{TEST_ORIGIN}/");
        settings.cookies.secure = false;
        settings.session.provider_init_timeout_seconds = 2;
        settings.session.logout_timeout_seconds = 1;
        settings
    }

    /// Server-context settings
    #[must_use]
    pub fn server_settings() -> BidgateSettings {
        let mut settings = Self::settings();
        settings.application.context = ExecutionContext::Server;
        settings
    }
}
