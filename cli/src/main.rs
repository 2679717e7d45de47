use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use session_auth::config::parse_backend;
use session_auth::{
    AuthConfig, AuthError, AuthService, BackendKind, Credentials, MemoryStore, MockAuthService, SessionAdapter,
    UserProfile, build_service, build_store,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE_DIR: &str = ".auth-session";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("missing secret; pass --secret or set AUTH_SECRET")]
    MissingSecret,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "auth-cli", version, about = "Drive the session-auth lifecycle from a terminal")]
struct Cli {
    /// `http` or `mock`; overrides AUTH_BACKEND.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Auth API root; overrides AUTH_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory holding the persisted session; overrides AUTH_STORE_DIR.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Mock latency in milliseconds; overrides AUTH_MOCK_DELAY_MS.
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Session(SessionCommand),
    /// Walk through the mock accounts with an in-memory session.
    Demo,
}

/// Commands that act on the persisted session.
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Sign in and persist the session.
    Login {
        identifier: String,
        #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
        secret: Option<String>,
        #[arg(long, default_value_t = false)]
        remember_me: bool,
    },
    /// Sign out and clear the persisted session.
    Logout,
    /// Exchange the stored refresh token for new tokens.
    Refresh,
    /// Print the signed-in user.
    Whoami {
        /// Ignore the cached profile and ask the backend.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Print whether a session is stored.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Demo => run_demo(config.mock_delay).await,
        Command::Session(command) => run_session_command(&config, command).await,
    }
}

async fn run_session_command(config: &AuthConfig, command: SessionCommand) -> Result<(), CliError> {
    let service = build_service(config, build_store(config))?;

    match command {
        SessionCommand::Login { identifier, secret, remember_me } => {
            let secret = secret.ok_or(CliError::MissingSecret)?;
            let mut credentials = Credentials::new(identifier, secret);
            if remember_me {
                credentials = credentials.remember_me(true);
            }
            run_login(service.as_ref(), &credentials).await
        }
        SessionCommand::Logout => {
            service.logout().await;
            println!("signed out");
            Ok(())
        }
        SessionCommand::Refresh => {
            let session = service.refresh_tokens().await?;
            println!("tokens refreshed (expires in {})", describe_expiry(session.expires_in_seconds));
            Ok(())
        }
        SessionCommand::Whoami { fresh } => {
            if fresh {
                service.invalidate_cached_user()?;
            }
            let user = service.current_user().await?;
            print_json(&user)
        }
        SessionCommand::Status => {
            run_status(config, service.as_ref());
            Ok(())
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<AuthConfig, CliError> {
    let mut config = AuthConfig::from_env()?;
    if let Some(backend) = &cli.backend {
        config.backend = parse_backend(backend)?;
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = Some(base_url.trim_end_matches('/').to_owned());
    }
    if let Some(dir) = &cli.store_dir {
        config.store_dir = Some(dir.clone());
    }
    if config.store_dir.is_none() {
        config.store_dir = Some(PathBuf::from(DEFAULT_STORE_DIR));
    }
    if let Some(delay_ms) = cli.delay_ms {
        config.mock_delay = Duration::from_millis(delay_ms);
    }
    Ok(config)
}

async fn run_login(service: &dyn AuthService, credentials: &Credentials) -> Result<(), CliError> {
    let session = service.login(credentials).await?;
    match &session.user {
        Some(user) => println!("signed in as {}", user.identifier),
        None => println!("signed in"),
    }
    println!("token expires in {}", describe_expiry(session.expires_in_seconds));
    Ok(())
}

fn run_status(config: &AuthConfig, service: &dyn AuthService) {
    let backend = match config.backend {
        BackendKind::Http => "http",
        BackendKind::Mock => "mock",
    };
    println!("backend:       {backend}");
    if let Some(base_url) = &config.base_url {
        println!("base url:      {base_url}");
    }
    println!("authenticated: {}", service.is_authenticated());
}

fn describe_expiry(seconds: Option<u64>) -> String {
    seconds.map_or_else(|| "unknown".to_owned(), |s| format!("{s}s"))
}

fn print_json(user: &UserProfile) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

fn print_user(user: &UserProfile) {
    println!("  id:           {}", user.id);
    println!("  identifier:   {}", user.identifier);
    println!("  display name: {}", user.display_name.as_deref().unwrap_or("-"));
    println!("  roles:        {}", user.roles.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("  last login:   {}", user.last_login_at);
}

async fn run_demo(delay: Duration) -> Result<(), CliError> {
    println!("Mock authentication demo (delay {} ms)", delay.as_millis());
    println!("--------------------------------");

    let service = Arc::new(MockAuthService::with_delay(Arc::new(MemoryStore::new()), delay));
    let adapter = SessionAdapter::new(service);
    println!("initially authenticated: {}", adapter.is_authenticated());

    println!("\nlogging in with invalid credentials...");
    if !adapter.login(&Credentials::new("wrong@example.com", "incorrect")).await {
        println!("login failed as expected: {}", adapter.error().unwrap_or_default());
    }

    println!("\nlogging in as admin@example.com...");
    let credentials = Credentials::new("admin@example.com", "admin123").remember_me(true);
    let success = adapter.login(&credentials).await;
    println!("login successful: {success}");
    println!("authenticated:    {}", adapter.is_authenticated());
    if let Some(user) = adapter.user() {
        print_user(&user);
    }

    println!("\nlogging out...");
    adapter.logout().await;
    println!("authenticated after logout: {}", adapter.is_authenticated());
    println!("user after logout:          {}", if adapter.user().is_some() { "present" } else { "none" });

    println!("\navailable test accounts:");
    println!("- admin@example.com / admin123");
    println!("- user@example.com / user123");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
