//! Composition root for the authentication session
//!
//! The factory picks the token-store and SSO strategies for the configured
//! [`ExecutionContext`](crate::settings::ExecutionContext) once, at construction,
//! so no other code has to branch on where it runs.

pub mod factory;

pub use factory::{AuthenticationServiceFactory, SessionServices};
