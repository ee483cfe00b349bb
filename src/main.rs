#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{anyhow, bail, Context, Result};
use bidgate::{
    authentication::{AuthenticationServiceFactory, SessionServices},
    settings::BidgateSettings,
    sso::Navigator,
    LogoutOptions,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Cookie header replayed into the token store, as a browser would send it
const COOKIE_ENV: &str = "BIDGATE_COOKIE";
/// Location the session starts from (set it to the SSO callback URL to finish a login)
const LOCATION_ENV: &str = "BIDGATE_LOCATION";

/// Terminal stand-in for browser navigation
struct ConsoleNavigator {
    current: Mutex<Option<String>>,
}

impl Navigator for ConsoleNavigator {
    fn current_url(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn assign(&self, url: &str) {
        println!("Open in your browser: {url}");
    }

    fn replace(&self, url: &str) {
        log::debug!("Location replaced with {url}");
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Also loads .env and initializes the logger
    let settings =
        BidgateSettings::load().map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map_or("status", String::as_str);

    let navigator = Arc::new(ConsoleNavigator {
        current: Mutex::new(std::env::var(LOCATION_ENV).ok()),
    });
    let services = AuthenticationServiceFactory::create_session_services(&settings, navigator)
        .context("Failed to build authentication services")?;
    if let (Some(cookies), Ok(header)) = (services.cookies.as_ref(), std::env::var(COOKIE_ENV)) {
        cookies.hydrate(&header);
    }

    let result = match command {
        "status" => status(&services).await,
        "login" => {
            let (Some(email), Some(password)) = (args.get(1), args.get(2)) else {
                bail!("usage: bidgate login <email> <password>");
            };
            login(&services, email, password).await
        }
        "sso-login" => services
            .manager
            .login()
            .await
            .context("Failed to start SSO login"),
        "logout" => logout(&services).await,
        other => {
            print_usage();
            Err(anyhow!("Unknown command: {other}"))
        }
    };

    services.manager.shutdown();
    result
}

async fn status(services: &SessionServices) -> Result<()> {
    if let Err(e) = services.manager.init().await {
        println!("⚠️  {e}");
    }
    print_state(services)
}

async fn login(services: &SessionServices, email: &str, password: &str) -> Result<()> {
    let profile = services
        .manager
        .login_with_credentials(email, password)
        .await
        .context("Login failed")?;

    match profile {
        Some(profile) => println!(
            "✓ Logged in as {}",
            profile.display_name().unwrap_or(profile.id)
        ),
        None => println!("✓ Logged in (profile not available)"),
    }
    print_state(services)?;
    print_set_cookies(services);
    Ok(())
}

async fn logout(services: &SessionServices) -> Result<()> {
    if let Err(e) = services.manager.init().await {
        log::debug!("Initialization before logout reported: {e}");
    }
    services.manager.logout(&LogoutOptions::default()).await;
    println!("✓ Logged out");
    print_set_cookies(services);
    Ok(())
}

fn print_state(services: &SessionServices) -> Result<()> {
    let state = serde_json::json!({
        "phase": services.manager.session_phase(),
        "isSsoAuthenticated": services.manager.is_sso_authenticated(),
        "state": services.manager.auth_state(),
    });
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn print_set_cookies(services: &SessionServices) {
    if let Some(cookies) = services.cookies.as_ref() {
        for header in cookies.set_cookie_headers() {
            println!("Set-Cookie: {header}");
        }
    }
}

fn print_usage() {
    println!("bidgate {}", bidgate::VERSION);
    println!();
    println!("Commands:");
    println!("  status                    - Initialize the session and print its state");
    println!("  login <email> <password>  - Credential login, prints the profile and cookies");
    println!("  sso-login                 - Print the SSO authorization URL");
    println!("  logout                    - End the session and print removal cookies");
    println!();
    println!("Environment:");
    println!("  {COOKIE_ENV}   - Cookie header to restore the session from");
    println!("  {LOCATION_ENV} - Current location, e.g. the SSO callback URL");
}
