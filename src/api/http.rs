use super::{ApiClient, ApiResult, TokenGrant};
use crate::models::auth::ApiError;
use crate::models::{RegistrationRequest, UserProfile};
use crate::settings::ApiSettings;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// reqwest-backed [`ApiClient`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpApiClient {
    /// Create a client rooted at `base_url` (e.g. `https://host/api`)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create a client from the `[api]` settings section
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, ApiError> {
        Self::new(
            &settings.base_url,
            Duration::from_secs(settings.timeout_seconds),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_enveloped<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&body)
                    .or_else(|| status.canonical_reason().map(ToString::to_string))
                    .unwrap_or_default(),
            });
        }

        let envelope: ApiResult<T> = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("Failed to parse response envelope: {e}")))?;
        envelope.into_result()
    }
}

/// `errorMessage` from an error body, when it is an envelope
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("errorMessage")?
        .as_str()
        .map(ToString::to_string)
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn exchange_token(&self, sso_token: &str) -> Result<TokenGrant, ApiError> {
        let request = self
            .http_client
            .post(self.endpoint("auth/token-exchange"))
            .json(&serde_json::json!({ "ssoToken": sso_token }));
        self.send_enveloped(request).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let request = self
            .http_client
            .get(self.endpoint("users/profile"))
            .bearer_auth(access_token);
        self.send_enveloped(request).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, ApiError> {
        let request = self
            .http_client
            .post(self.endpoint("auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }));
        self.send_enveloped(request).await
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<TokenGrant, ApiError> {
        let request = self
            .http_client
            .post(self.endpoint("auth/register"))
            .json(request);
        self.send_enveloped(request).await
    }
}
