//! Navigation guards
//!
//! Guards read the session and decide; they never change it. The only state
//! they own is [`RedirectMemory`], the destination a signed-out user tried to
//! reach, replayed after login.

use super::AuthSessionManager;
use crate::settings::{ApplicationSettings, ExecutionContext};
use crate::utils::logging::LoggingHelper;
use std::sync::{Arc, Mutex, PoisonError};

const MAX_REDIRECT_LENGTH: usize = 2048;

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect { to: String },
}

impl GuardDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Last destination denied to a signed-out user
#[derive(Debug, Default)]
pub struct RedirectMemory {
    pending: Mutex<Option<String>>,
}

impl RedirectMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `path`; only same-origin relative paths are kept
    pub fn remember(&self, path: &str) {
        if !is_local_path(path) {
            log::warn!("Not remembering non-local redirect target: {path}");
            return;
        }
        *self.lock() = Some(path.to_string());
    }

    #[must_use]
    pub fn peek(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Consume the remembered destination
    pub fn take(&self) -> Option<String> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Relative, same-origin path (starts with `/`, not `//`, no scheme, no traversal)
fn is_local_path(path: &str) -> bool {
    path.len() <= MAX_REDIRECT_LENGTH
        && path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.contains("..")
        && !path.contains(':')
        && !path.chars().any(char::is_control)
}

/// Allows authenticated users; sends everyone else to the login page
pub struct AuthGuard {
    session: AuthSessionManager,
    memory: Arc<RedirectMemory>,
    login_path: String,
    home_path: String,
}

impl AuthGuard {
    #[must_use]
    pub fn new(
        session: AuthSessionManager,
        memory: Arc<RedirectMemory>,
        settings: &ApplicationSettings,
    ) -> Self {
        Self {
            session,
            memory,
            login_path: settings.login_path.clone(),
            home_path: settings.home_path.clone(),
        }
    }

    /// Decide whether `path` may be entered, remembering it when denied
    #[must_use]
    pub fn check(&self, path: &str) -> GuardDecision {
        if self.session.is_authenticated() {
            return GuardDecision::Allow;
        }

        if path != self.login_path {
            self.memory.remember(path);
        }
        LoggingHelper::log_guard_redirect("AuthGuard", path, &self.login_path);
        GuardDecision::Redirect {
            to: self.login_path.clone(),
        }
    }

    /// Post-login destination: the remembered path, or home
    #[must_use]
    pub fn take_redirect(&self) -> String {
        self.memory
            .take()
            .unwrap_or_else(|| self.home_path.clone())
    }
}

/// Keeps authenticated users off guest-only pages such as login and register
pub struct GuestGuard {
    session: AuthSessionManager,
    home_path: String,
}

impl GuestGuard {
    #[must_use]
    pub fn new(session: AuthSessionManager, settings: &ApplicationSettings) -> Self {
        Self {
            session,
            home_path: settings.home_path.clone(),
        }
    }

    #[must_use]
    pub fn check(&self, path: &str) -> GuardDecision {
        // No session can be evaluated during a server-rendered pass
        if self.session.context() == ExecutionContext::Server || !self.session.is_authenticated() {
            return GuardDecision::Allow;
        }

        LoggingHelper::log_guard_redirect("GuestGuard", path, &self.home_path);
        GuardDecision::Redirect {
            to: self.home_path.clone(),
        }
    }
}
