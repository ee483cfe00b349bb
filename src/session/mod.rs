//! Authentication session state
//!
//! [`AuthSessionManager`] reconciles three independent signals (a stored
//! first-party access token, the SSO provider's session and the backend
//! profile) into one [`AuthState`](crate::models::AuthState) published on a
//! watch channel. Guards in [`guard`] are pure consumers of that state.

pub mod guard;
pub mod manager;

pub use guard::{AuthGuard, GuardDecision, GuestGuard, RedirectMemory};
pub use manager::AuthSessionManager;
