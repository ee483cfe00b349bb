//! Unified testing utilities for bidgate
//!
//! Compiled for unit tests and, behind the `testing` feature, for the
//! integration tests under `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built test data (profiles, token grants, settings, JWTs)
//! - [`mock`] - Scriptable fakes for the provider, backend, token store and navigator
//!
//! ## Usage
//!
//! ```rust
//! use bidgate::testing::{MockApiClient, MockSsoProvider, TestFixtures};
//!
//! let api = MockApiClient::new().with_profile(Ok(TestFixtures::profile("1", &["bidder"])));
//! let sso = MockSsoProvider::new();
//! assert_eq!(sso.call_count(), 0);
//! # let _ = api;
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;
pub use mock::{LogoutBehavior, MemoryTokenStore, MockApiClient, MockSsoProvider, RecordingNavigator};

/// Common test constants
pub mod constants {
    /// Default test email address
    pub const TEST_EMAIL: &str = "bidder@example.com";

    /// Default SSO subject
    pub const TEST_SUBJECT: &str = "f3a1c2d4";

    /// Default test client id
    pub const TEST_CLIENT_ID: &str = "marketplace-web";

    /// Default application origin
    pub const TEST_ORIGIN: &str = "https://market.example.com";
}
