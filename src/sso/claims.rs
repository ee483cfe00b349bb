//! Token claim decoding
//!
//! Provider tokens carry roles in two places: realm roles under
//! `realm_access.roles` and per-client roles under `resource_access.<client>.roles`.
//! Both are flattened into one de-duplicated role list on [`UserProfile`].

use crate::models::auth::SsoError;
use crate::models::UserProfile;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Claims that describe the token itself rather than the user
const RESERVED_CLAIMS: &[&str] = &[
    "sub",
    "iss",
    "aud",
    "exp",
    "iat",
    "nbf",
    "jti",
    "auth_time",
    "azp",
    "typ",
    "nonce",
    "acr",
    "amr",
    "sid",
    "session_state",
    "at_hash",
    "c_hash",
    "scope",
    "allowed-origins",
    "email_verified",
    "preferred_username",
    "email",
    "given_name",
    "family_name",
    "name",
    "phone_number",
    "realm_access",
    "resource_access",
    "roles",
];

/// Decode the payload segment of a JWT without verifying its signature
///
/// # Errors
///
/// Returns an error if the token is not three dot-separated segments or the
/// payload is not base64-encoded JSON
pub fn decode_jwt_payload(token: &str) -> Result<Value, SsoError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(SsoError::InvalidResponse("Invalid JWT format".to_string()));
    }

    let payload_b64 = parts[1];
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| general_purpose::STANDARD.decode(payload_b64))
        .map_err(|_| SsoError::InvalidResponse("Base64 decode failed".to_string()))?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|_| SsoError::InvalidResponse("JSON parse failed".to_string()))
}

/// Collect realm, resource and plain `roles` claims into one sorted, unique list
#[must_use]
pub fn extract_roles(claims: &Value) -> Vec<String> {
    let mut roles = Vec::new();

    let string_array = |value: Option<&Value>| -> Vec<String> {
        value
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    roles.extend(string_array(claims.pointer("/realm_access/roles")));

    if let Some(resources) = claims.get("resource_access").and_then(Value::as_object) {
        for resource in resources.values() {
            roles.extend(string_array(resource.get("roles")));
        }
    }

    roles.extend(string_array(claims.get("roles")));

    UserProfile::dedup_roles(roles)
}

/// Build a profile from decoded claims; `None` without a `sub` claim
#[must_use]
pub fn profile_from_claims(claims: &Value) -> Option<UserProfile> {
    let text = |key: &str| -> Option<String> {
        claims
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };

    let id = text("sub")?;

    let attributes = claims
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(UserProfile {
        id,
        username: text("preferred_username"),
        email: text("email"),
        first_name: text("given_name"),
        last_name: text("family_name"),
        full_name: text("name"),
        roles: extract_roles(claims),
        attributes,
        phone_number: text("phone_number"),
    })
}

/// Token expiry from the `exp` claim
#[must_use]
pub fn expires_at(claims: &Value) -> Option<DateTime<Utc>> {
    claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

/// Fill keys missing from `base` with values from `extra`
pub fn merge_missing(base: &mut Value, extra: &Value) {
    let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) else {
        return;
    };
    for (key, value) in extra_map {
        base_map.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

/// Claims from an access token and optional ID token, ID token taking precedence
#[must_use]
pub fn combined_claims(access_token: &str, id_token: Option<&str>) -> Value {
    let mut claims = id_token
        .and_then(|token| decode_jwt_payload(token).ok())
        .unwrap_or_else(|| Value::Object(Map::new()));

    match decode_jwt_payload(access_token) {
        Ok(access_claims) => merge_missing(&mut claims, &access_claims),
        Err(e) => log::debug!("Access token claims unavailable: {e}"),
    }

    claims
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_jwt(claims: &Value) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_decode_jwt_payload() {
        let token = encode_jwt(&json!({"sub": "42"}));
        assert_eq!(decode_jwt_payload(&token).unwrap()["sub"], "42");
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(decode_jwt_payload("not-a-jwt").is_err());
        assert!(decode_jwt_payload("a.%%%.c").is_err());
        let not_json = general_purpose::URL_SAFE_NO_PAD.encode("plain text");
        assert!(decode_jwt_payload(&format!("a.{not_json}.c")).is_err());
    }

    #[test]
    fn test_extract_roles_merges_and_deduplicates() {
        let claims = json!({
            "realm_access": {"roles": ["bidder", "offline_access"]},
            "resource_access": {
                "marketplace-web": {"roles": ["seller", "bidder"]},
                "account": {"roles": ["manage-account"]}
            }
        });

        assert_eq!(
            extract_roles(&claims),
            vec!["bidder", "manage-account", "offline_access", "seller"]
        );
    }

    #[test]
    fn test_extract_roles_tolerates_missing_structures() {
        assert!(extract_roles(&json!({})).is_empty());
        assert!(extract_roles(&json!({"realm_access": {"roles": "admin"}})).is_empty());
        assert_eq!(extract_roles(&json!({"roles": ["admin", 7]})), vec!["admin"]);
    }

    #[test]
    fn test_profile_from_claims() {
        let claims = json!({
            "sub": "f3a1",
            "preferred_username": "ada",
            "email": "ada@example.com",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "name": "Ada Lovelace",
            "exp": 1_700_000_000,
            "realm_access": {"roles": ["admin"]},
            "locale": "en"
        });

        let profile = profile_from_claims(&claims).unwrap();
        assert_eq!(profile.id, "f3a1");
        assert_eq!(profile.username.as_deref(), Some("ada"));
        assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.roles, vec!["admin"]);
        assert_eq!(profile.attributes.len(), 1);
        assert_eq!(profile.attributes["locale"], "en");
    }

    #[test]
    fn test_profile_requires_subject() {
        assert!(profile_from_claims(&json!({"email": "x@example.com"})).is_none());
    }

    #[test]
    fn test_expires_at() {
        let exp = expires_at(&json!({"exp": 1_700_000_000})).unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_000);
        assert!(expires_at(&json!({})).is_none());
    }

    #[test]
    fn test_combined_claims_prefers_id_token() {
        let access = encode_jwt(&json!({"sub": "1", "email": "old@example.com", "realm_access": {"roles": ["bidder"]}}));
        let id = encode_jwt(&json!({"sub": "1", "email": "new@example.com"}));

        let claims = combined_claims(&access, Some(&id));
        assert_eq!(claims["email"], "new@example.com");
        assert_eq!(extract_roles(&claims), vec!["bidder"]);

        let opaque = combined_claims("opaque-token", None);
        assert_eq!(opaque, json!({}));
    }
}
