//! First-party backend gateway
//!
//! The backend wraps every payload in a `Result<T>` envelope
//! (`isSuccess`, `data`, `errorMessage`). [`ApiClient`] exposes the four calls
//! the session manager needs; [`HttpApiClient`] is the reqwest implementation.

pub mod http;

pub use http::HttpApiClient;

use crate::models::auth::ApiError;
use crate::models::{RegistrationRequest, UserProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Backend response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult<T> {
    pub is_success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl<T> ApiResult<T> {
    /// Unwrap the envelope
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Envelope`] when the backend reported failure and
    /// [`ApiError::Decode`] when a successful envelope carries no data
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.is_success {
            return Err(ApiError::Envelope(
                self.error_message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::Decode("Successful response without data".to_string()))
    }
}

/// First-party access token issued by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Calls the session manager makes against the first-party backend
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// `POST /auth/token-exchange`: trade a provider token for a first-party token
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] with status 404 when the SSO identity has no
    /// account, or another [`ApiError`] on failure
    async fn exchange_token(&self, sso_token: &str) -> Result<TokenGrant, ApiError>;

    /// `GET /users/profile` with the first-party bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the envelope reports failure
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    /// `POST /auth/login` with email and password
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected or the request fails
    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, ApiError>;

    /// `POST /auth/register`
    ///
    /// # Errors
    ///
    /// Returns an error if registration is rejected or the request fails
    async fn register(&self, request: &RegistrationRequest) -> Result<TokenGrant, ApiError>;
}
