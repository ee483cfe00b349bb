use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub mod auth;

/// Canonical user profile shared by the backend and the SSO provider
///
/// Snapshots are replaced wholesale on every load and never patched in place.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl UserProfile {
    /// Check whether the profile carries `role`
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check whether the profile carries at least one of `roles`
    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Name suitable for the header: full name, then first/last, then username
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        if let Some(full_name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(full_name.to_string());
        }

        let joined = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        if !joined.trim().is_empty() {
            return Some(joined.trim().to_string());
        }

        self.username.clone().or_else(|| self.email.clone())
    }

    /// Collapse role names into a sorted, unique list without empty entries
    #[must_use]
    pub fn dedup_roles<I, S>(roles: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        roles
            .into_iter()
            .map(Into::into)
            .filter(|r: &String| !r.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Read-only projection of the session published to the rest of the application
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_initialized: bool,
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
}

/// The four independent session booleans
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub is_initialized: bool,
    pub is_sso_authenticated: bool,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

/// Effective phase derived from [`SessionFlags`]
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Unauthenticated,
    SsoAuthenticated,
    Authenticated,
}

impl SessionFlags {
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated {
            SessionPhase::Authenticated
        } else if self.is_sso_authenticated {
            SessionPhase::SsoAuthenticated
        } else if self.is_initialized {
            SessionPhase::Unauthenticated
        } else if self.is_loading {
            SessionPhase::Initializing
        } else {
            SessionPhase::Uninitialized
        }
    }
}

/// Options forwarded to the SSO provider on logout
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogoutOptions {
    /// Where the provider should send the browser after ending its session
    pub redirect_uri: Option<String>,
    /// Also revoke provider-issued tokens before redirecting
    pub revoke_tokens: bool,
    /// Navigate to the provider's end-session endpoint
    pub redirect: bool,
}

impl Default for LogoutOptions {
    fn default() -> Self {
        Self {
            redirect_uri: None,
            revoke_tokens: false,
            redirect: true,
        }
    }
}

/// Payload for first-party account registration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_deserializes_backend_shape() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "1",
            "email": "bidder@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "roles": ["bidder"],
            "attributes": {"tier": "gold"}
        }))
        .unwrap();

        assert_eq!(profile.id, "1");
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.roles, vec!["bidder".to_string()]);
        assert_eq!(profile.attributes["tier"], "gold");
        assert!(profile.phone_number.is_none());
    }

    #[test]
    fn test_profile_missing_roles_defaults_to_empty() {
        let profile: UserProfile = serde_json::from_str(r#"{"id":"7"}"#).unwrap();
        assert!(profile.roles.is_empty());
        assert!(!profile.has_role("admin"));
    }

    #[test]
    fn test_role_checks() {
        let profile = UserProfile {
            id: "1".to_string(),
            roles: vec!["bidder".to_string(), "seller".to_string()],
            ..Default::default()
        };

        assert!(profile.has_role("seller"));
        assert!(profile.has_any_role(&["admin", "bidder"]));
        assert!(!profile.has_any_role(&["admin"]));
        assert!(!profile.has_any_role::<&str>(&[]));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut profile = UserProfile {
            id: "1".to_string(),
            username: Some("ada".to_string()),
            ..Default::default()
        };
        assert_eq!(profile.display_name().as_deref(), Some("ada"));

        profile.first_name = Some("Ada".to_string());
        assert_eq!(profile.display_name().as_deref(), Some("Ada"));

        profile.full_name = Some("Ada King".to_string());
        assert_eq!(profile.display_name().as_deref(), Some("Ada King"));
    }

    #[test]
    fn test_dedup_roles() {
        let roles = UserProfile::dedup_roles(["seller", "bidder", "seller", ""]);
        assert_eq!(roles, vec!["bidder".to_string(), "seller".to_string()]);
    }

    #[test]
    fn test_session_phase_derivation() {
        let mut flags = SessionFlags::default();
        assert_eq!(flags.phase(), SessionPhase::Uninitialized);

        flags.is_loading = true;
        assert_eq!(flags.phase(), SessionPhase::Initializing);

        flags.is_loading = false;
        flags.is_initialized = true;
        assert_eq!(flags.phase(), SessionPhase::Unauthenticated);

        flags.is_sso_authenticated = true;
        assert_eq!(flags.phase(), SessionPhase::SsoAuthenticated);

        flags.is_authenticated = true;
        assert_eq!(flags.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_logout_options_default_redirects() {
        let options = LogoutOptions::default();
        assert!(options.redirect);
        assert!(!options.revoke_tokens);
        assert!(options.redirect_uri.is_none());
    }
}
