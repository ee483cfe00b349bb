use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Where the session manager is running
///
/// Chosen once at construction; the factory uses it to pick real or no-op
/// strategies for token storage and SSO.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Interactive client with cookies and redirects
    #[default]
    Browser,
    /// Server-rendered pass without client storage
    Server,
}

impl std::str::FromStr for ExecutionContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "server" | "ssr" => Ok(Self::Server),
            other => Err(format!("Unknown execution context: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BidgateSettings {
    pub application: ApplicationSettings,
    pub api: ApiSettings,
    pub sso: SsoSettings,
    pub cookies: CookieSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub context: ExecutionContext,
    /// Login entry point used by the auth guard
    pub login_path: String,
    /// Landing page for authenticated users and post-login fallback
    pub home_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoSettings {
    pub enabled: bool,
    pub issuer_url: String,
    /// Defaults to `{issuer_url}/.well-known/openid-configuration`
    pub discovery_url: Option<String>,
    pub client_id: Option<String>,
    /// Environment variable name holding the client id
    pub client_id_env: Option<String>,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    /// Refresh the provider token when it expires within this many seconds
    pub min_token_validity_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound on waiting for the provider's first notification during init
    pub provider_init_timeout_seconds: u64,
    /// Upper bound on the remote logout call; the local reset never waits longer
    pub logout_timeout_seconds: u64,
    /// Lifetime used when a token grant omits `expiresIn`
    pub default_token_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            context: ExecutionContext::Browser,
            login_path: "/login".to_string(),
            home_path: "/".to_string(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for SsoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer_url: "http://localhost:8080/realms/marketplace".to_string(),
            discovery_url: None,
            client_id: None,
            client_id_env: None,
            redirect_uri: "http://localhost:4200/".to_string(),
            post_logout_redirect_uri: None,
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            min_token_validity_seconds: 30,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true,
            path: "/".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            provider_init_timeout_seconds: 10,
            logout_timeout_seconds: 5,
            default_token_lifetime_seconds: 3600,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BidgateSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Self::initialize_logging(&settings.logging);
        Ok(settings)
    }

    /// Initialize `env_logger` with the configured level unless `RUST_LOG` is set
    fn initialize_logging(logging: &LoggingSettings) {
        let env = env_logger::Env::default().default_filter_or(logging.level.clone());
        if let Err(e) = env_logger::Builder::from_env(env).try_init() {
            log::debug!("Keeping the existing logger: {e}");
        }
    }

    /// Load base settings from TOML file(s) or use defaults
    ///
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `BIDGATE_CONFIG_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed
    ///
    /// Runs before the logger is initialized, so progress goes to stdout.
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::load_from_dir(Path::new("."))?.unwrap_or_default();

        if let Ok(config_dir) = std::env::var("BIDGATE_CONFIG_DIR") {
            match Self::load_from_dir(Path::new(&config_dir))? {
                Some(dir_settings) => {
                    println!("Overriding settings from {config_dir}/Settings.toml");
                    settings = dir_settings;
                }
                None => println!(
                    "BIDGATE_CONFIG_DIR set but no Settings.toml found in: {config_dir}"
                ),
            }
        }

        Ok(settings)
    }

    /// Parse `Settings.toml` inside `dir`, if present
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, Box<dyn std::error::Error>> {
        let path = dir.join("Settings.toml");
        if !path.exists() {
            return Ok(None);
        }

        let toml_content = fs::read_to_string(&path)?;
        let settings = basic_toml::from_str(&toml_content)?;
        println!("Loaded settings from {}", path.display());
        Ok(Some(settings))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_api_env_overrides(&mut settings.api);
        Self::apply_sso_env_overrides(&mut settings.sso);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_session_env_overrides(&mut settings.session);

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(context) = std::env::var("BIDGATE_CONTEXT") {
            match context.parse() {
                Ok(context) => app_settings.context = context,
                Err(e) => eprintln!("Ignoring BIDGATE_CONTEXT: {e}"),
            }
        }
    }

    fn apply_api_env_overrides(api_settings: &mut ApiSettings) {
        if let Ok(base_url) = std::env::var("API_BASE_URL") {
            api_settings.base_url = base_url;
        }
    }

    fn apply_sso_env_overrides(sso_settings: &mut SsoSettings) {
        if let Ok(issuer_url) = std::env::var("SSO_ISSUER_URL") {
            sso_settings.issuer_url = issuer_url;
        }
        if let Ok(client_id) = std::env::var("SSO_CLIENT_ID") {
            sso_settings.client_id = Some(client_id);
        }
        if let Ok(redirect_uri) = std::env::var("SSO_REDIRECT_URI") {
            sso_settings.redirect_uri = redirect_uri;
        }
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        Self::apply_numeric_env_override(
            "PROVIDER_INIT_TIMEOUT_SECONDS",
            &mut session_settings.provider_init_timeout_seconds,
        );
        Self::apply_numeric_env_override(
            "LOGOUT_TIMEOUT_SECONDS",
            &mut session_settings.logout_timeout_seconds,
        );
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }
}

impl SsoSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        if let Some(env_var) = &self.client_id_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_id.clone()
    }

    /// Discovery document URL, derived from the issuer when not configured
    #[must_use]
    pub fn get_discovery_url(&self) -> String {
        self.discovery_url.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/openid-configuration",
                self.issuer_url.trim_end_matches('/')
            )
        })
    }
}
