use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tenant_session::host::{Location, MemoryCookieJar, MemoryLocation, authorization_code, visibility_channel};
use tenant_session::net::{HttpIdentityProvider, HttpTenantApi};
use tenant_session::session::{TeardownReason, teardown};
use tenant_session::storage::FileStorage;
use tenant_session::{Collaborators, SessionConfig, SessionContext, SessionError, mount, token};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("callback url carries no authorization code: {0}")]
    MissingCode(Url),
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "tenant-session", about = "Drive a tenant-scoped client session against a live API")]
struct Cli {
    /// Directory holding the persisted local and session storage documents.
    #[arg(long, env = "SESSION_STATE_DIR", default_value = ".tenant-session")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Complete an OAuth redirect: exchange the code in URL and load the tenant.
    Callback { url: Url },
    /// Print the persisted session without touching the network.
    Status,
    /// Mount the session and keep tokens fresh until Ctrl-C.
    Run,
    /// Tear down the persisted session.
    Logout,
}

/// The CLI stands in for a browser tab: file-backed storage plus in-memory
/// location and cookies.
struct Host {
    ctx: Arc<SessionContext>,
    location: Arc<MemoryLocation>,
    cookies: Arc<MemoryCookieJar>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::from_env().map_err(SessionError::from)?;

    match cli.command {
        Command::Callback { url } => run_callback(config, &cli.state_dir, url).await,
        Command::Status => run_status(config, &cli.state_dir),
        Command::Run => run_session(config, &cli.state_dir).await,
        Command::Logout => run_logout(config, &cli.state_dir),
    }
}

fn build_host(config: SessionConfig, state_dir: &Path, location: Url) -> Result<Host, CliError> {
    let identity = HttpIdentityProvider::new(&config).map_err(SessionError::from)?;
    let tenant_api = HttpTenantApi::new(&config).map_err(SessionError::from)?;
    let location = Arc::new(MemoryLocation::new(location));
    let cookies = Arc::new(MemoryCookieJar::new());

    let ctx = SessionContext::new(
        config,
        Collaborators {
            local: Arc::new(FileStorage::new(state_dir.join("local.json"))),
            session: Arc::new(FileStorage::new(state_dir.join("session.json"))),
            identity: Arc::new(identity),
            tenant_api: Arc::new(tenant_api),
            location: location.clone(),
            cookies: cookies.clone(),
        },
    );
    Ok(Host { ctx: Arc::new(ctx), location, cookies })
}

async fn run_callback(config: SessionConfig, state_dir: &Path, url: Url) -> Result<(), CliError> {
    if authorization_code(&url).is_none() {
        return Err(CliError::MissingCode(url));
    }
    let host = build_host(config, state_dir, url)?;
    let (_visibility, signal) = visibility_channel();
    let mut mounted = mount(host.ctx.clone(), signal);

    let (bootstrap, loader) = mounted.settled().await;
    info!(?bootstrap, ?loader, "callback handled");
    mounted.dispose();

    print_status(&host.ctx);
    println!("location: {}", host.location.current());
    if let Some(cookie) = host.cookies.get(&host.ctx.config.keys.tenant_cookie) {
        println!("set-cookie: {}", cookie.header_value());
    }
    Ok(())
}

fn run_status(config: SessionConfig, state_dir: &Path) -> Result<(), CliError> {
    let base = config.api_base_url.clone();
    let host = build_host(config, state_dir, base)?;
    host.ctx.credentials.rehydrate();
    host.ctx.tenant.rehydrate();
    print_status(&host.ctx);
    Ok(())
}

async fn run_session(config: SessionConfig, state_dir: &Path) -> Result<(), CliError> {
    let base = config.api_base_url.clone();
    let host = build_host(config, state_dir, base)?;
    let (_visibility, signal) = visibility_channel();
    let mut mounted = mount(host.ctx.clone(), signal);

    let (bootstrap, loader) = mounted.settled().await;
    info!(?bootstrap, ?loader, "session bootstrapped");
    if !host.ctx.credentials.is_authenticated() {
        return Err(SessionError::Unauthenticated.into());
    }
    print_status(&host.ctx);

    let mut credentials = host.ctx.credentials.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        _ = credentials.wait_for(|state| state.credential.access_token.is_none()) => {
            info!(navigations = ?host.location.navigations(), "session ended");
        }
    }

    mounted.dispose();
    Ok(())
}

fn run_logout(config: SessionConfig, state_dir: &Path) -> Result<(), CliError> {
    let base = config.api_base_url.clone();
    let host = build_host(config, state_dir, base)?;
    host.ctx.credentials.rehydrate();
    host.ctx.tenant.rehydrate();
    teardown(&host.ctx, TeardownReason::Logout);
    println!("signed out; redirect to {}", host.location.current());
    Ok(())
}

fn print_status(ctx: &SessionContext) {
    let credential = ctx.credentials.snapshot();
    println!("authenticated: {}", ctx.credentials.is_authenticated());
    if let Some(user) = &credential.user {
        let label = user.email.as_deref().or(user.id.as_deref()).unwrap_or("(anonymous)");
        println!("user: {label}");
    }
    println!("role: {}", credential.role.as_deref().unwrap_or("-"));
    println!("tenant id: {}", credential.tenant_id.as_deref().unwrap_or("-"));
    println!("account code: {}", credential.account_code.as_deref().unwrap_or("-"));
    if let Some(access_token) = credential.access_token.as_deref() {
        match token::expires_at(access_token) {
            Ok(exp) => println!("access token expires in: {}s", exp.saturating_sub(token::now_unix())),
            Err(_) => println!("access token expiry: unknown"),
        }
    }
    let refresh = if ctx.credentials.refresh_slot().get().is_some() { "stored" } else { "absent" };
    println!("refresh credential: {refresh}");
    if let Some(tenant) = ctx.tenant.tenant() {
        println!("tenant: {} ({}) plan {:?}", tenant.name, tenant.slug, tenant.plan);
    }
}
