// Centralized logging utilities for session and provider lifecycle events
use crate::models::SessionPhase;
use crate::settings::ExecutionContext;
use log::{debug, info, warn};

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log session manager start-up
    pub fn log_session_init_start(context: ExecutionContext) {
        info!("🔧 Initializing authentication session ({context:?} context)");
    }

    /// Log that initialization was skipped because there is no client storage
    pub fn log_session_init_skipped() {
        debug!("⏭️  Server context: skipping session initialization");
    }

    /// Log the phase reached at the end of initialization
    pub fn log_session_init_complete(phase: SessionPhase, user_id: Option<&str>) {
        info!(
            "✅ Session initialized: phase={:?}, user={}",
            phase,
            user_id.unwrap_or("none")
        );
    }

    /// Log SSO provider readiness
    pub fn log_provider_ready(provider: &str, authenticated: bool) {
        info!("🎯 SSO provider {provider} ready (authenticated={authenticated})");
    }

    /// Log a provider that did not answer in time
    pub fn log_provider_init_timeout(provider: &str, seconds: u64) {
        warn!("⏱️  SSO provider {provider} did not initialize within {seconds}s");
    }

    /// Log discovery resolution
    pub fn log_discovery_resolved(issuer: &str, has_end_session: bool) {
        info!("🔍 Resolved OIDC endpoints for {issuer} (end_session={has_end_session})");
    }

    /// Log the authorization redirect
    pub fn log_authorization_redirect(client_id: &str, scopes: &str) {
        info!("🔍 Redirecting to SSO login for client {client_id} with scopes: {scopes}");
    }

    /// Log token exchange start
    pub fn log_code_exchange_start(provider: &str) {
        info!("🔄 Exchanging authorization code for tokens with {provider}");
    }

    /// Log token exchange summary
    pub fn log_token_response_summary(
        provider: &str,
        refresh_token: Option<&String>,
        id_token: Option<&String>,
        expires_in: Option<u64>,
    ) {
        info!(
            "🔍 Token response from {}: refresh_token={}, id_token={}, expires_in={:?}",
            provider,
            refresh_token.map_or("missing", |_| "present"),
            id_token.map_or("missing", |_| "present"),
            expires_in
        );
    }

    /// Log the first-party token exchange
    pub fn log_backend_exchange(outcome: &str) {
        info!("🔄 Backend token exchange: {outcome}");
    }

    /// Log that a user profile was loaded
    pub fn log_profile_loaded(source: &str, user_id: &str, role_count: usize) {
        info!("👤 Loaded {source} profile for user {user_id} ({role_count} roles)");
    }

    /// Log a provider-side transition received by the session manager
    pub fn log_provider_event(provider: &str, event: &str) {
        debug!("📨 {provider} event: {event}");
    }

    /// Log the local session reset
    pub fn log_session_reset(reason: &str) {
        info!("🧹 Session reset ({reason})");
    }

    /// Log a remote logout that failed or timed out
    pub fn log_remote_logout_failed(provider: &str, detail: &str) {
        warn!("⚠️  Remote logout via {provider} did not complete: {detail}");
    }

    /// Log a guard decision
    pub fn log_guard_redirect(guard: &str, from: &str, to: &str) {
        debug!("🚧 {guard}: redirecting {from} -> {to}");
    }
}
