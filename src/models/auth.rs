//! Error taxonomy for the session subsystem
//!
//! Every failure the session manager can surface is one of these variants.
//! Callers match on [`AuthError::NotRegistered`] to route a user to the
//! registration flow instead of an error page; everything else is a generic
//! failure that can be retried.

use thiserror::Error;

/// Errors raised by the first-party backend client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Backend answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// Backend answered 2xx but the `Result<T>` envelope reported failure
    #[error("request failed: {0}")]
    Envelope(String),
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// `true` for an HTTP 404 response
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// `true` for HTTP 401/403 responses
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

/// Errors raised by SSO provider implementations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsoError {
    #[error("SSO configuration error: {0}")]
    Configuration(String),
    #[error("SSO network error: {0}")]
    Network(String),
    #[error("invalid SSO response: {0}")]
    InvalidResponse(String),
    #[error("OAuth callback rejected: {0}")]
    Callback(String),
    #[error("SSO provider is not available in this execution context")]
    Unavailable,
}

/// Errors surfaced by the authentication session manager
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The SSO identity has no first-party account (HTTP 404 on token exchange)
    #[error("user is not registered")]
    NotRegistered,
    /// No SSO token could be retrieved from the provider
    #[error("no SSO token available")]
    NoSsoToken,
    /// No first-party access token is stored
    #[error("no access token available")]
    NoAccessToken,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Sso(#[from] SsoError),
}

impl AuthError {
    /// `true` when the caller should send the user to registration
    #[must_use]
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered)
    }
}
