#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the bidgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod authentication;
pub mod models;
pub mod session;
pub mod settings;
pub mod sso;
pub mod token_store;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authentication::{AuthenticationServiceFactory, SessionServices};
pub use models::auth::{ApiError, AuthError, SsoError};
pub use models::{AuthState, LogoutOptions, SessionPhase, UserProfile};
pub use session::{AuthGuard, AuthSessionManager, GuardDecision, GuestGuard};
pub use settings::{BidgateSettings, ExecutionContext};
