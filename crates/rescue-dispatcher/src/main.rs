//! # rescue-dispatcher
//!
//! Rapid Rescue dispatch server binary. Loads settings, opens the store,
//! and serves the WebSocket negotiation gateway and HTTP query surface.

#![deny(unsafe_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rescue_core::{Identity, Participant, Role};
use rescue_server::{JwtAuthenticator, RescueServer, ServerConfig};
use rescue_settings::{DEV_JWT_SECRET, RescueSettings};
use rescue_store::{ConnectionConfig, DispatchStore};
use tracing::{info, warn};

/// Rapid Rescue dispatch server.
#[derive(Parser, Debug)]
#[command(name = "rescue-dispatcher", about = "Rapid Rescue dispatch server")]
struct Cli {
    /// Settings file (defaults to `~/.rapid-rescue/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatch server (the default).
    Serve(ServeArgs),
    /// Print a signed credential for a driver or rider.
    Token(TokenArgs),
}

/// Flags that override the loaded settings.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// Account kind.
    #[arg(long, value_parser = ["driver", "rider"])]
    role: String,

    /// Account ID.
    #[arg(long)]
    id: i64,

    /// Display name carried in the credential.
    #[arg(long)]
    name: String,

    /// Contact email.
    #[arg(long)]
    email: Option<String>,

    /// Contact mobile number.
    #[arg(long)]
    mobile: Option<String>,
}

impl ServeArgs {
    fn apply(&self, settings: &mut RescueSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = path.to_string_lossy().into_owned();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load_settings(config: Option<&Path>) -> Result<RescueSettings> {
    match config {
        Some(path) => rescue_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => rescue_settings::load_settings().context("Failed to load settings"),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn authenticator(settings: &RescueSettings) -> JwtAuthenticator {
    JwtAuthenticator::new(&settings.auth.jwt_secret, settings.auth.token_ttl_minutes)
}

fn issue_token(settings: &RescueSettings, args: &TokenArgs) -> Result<String> {
    let role: Role = args.role.parse().map_err(anyhow::Error::msg)?;
    let identity = Identity {
        email: args.email.clone(),
        mobile: args.mobile.clone(),
        ..Identity::new(Participant { role, id: args.id }, args.name.clone())
    };
    authenticator(settings)
        .issue(&identity)
        .context("Failed to sign token")
}

fn open_store(settings: &RescueSettings) -> Result<DispatchStore> {
    let path = settings.database.resolved_path();
    ensure_parent_dir(Path::new(&path))?;
    let config = ConnectionConfig {
        pool_size: settings.database.pool_size,
        busy_timeout_ms: settings.database.busy_timeout_ms,
        ..ConnectionConfig::default()
    };
    let store = DispatchStore::open(&path, &config)
        .with_context(|| format!("Failed to open dispatch store at {path}"))?;
    info!(path, "dispatch store ready");
    Ok(store)
}

fn build_server(settings: &RescueSettings, store: DispatchStore) -> RescueServer {
    if settings.auth.jwt_secret == DEV_JWT_SECRET {
        warn!("using the development JWT secret; set JWT_SECRET_KEY in production");
    }
    RescueServer::new(
        ServerConfig::from_settings(settings),
        Arc::new(store),
        Arc::new(authenticator(settings)),
    )
}

/// Serve until `signal` resolves, then drain.
async fn run(server: RescueServer, signal: impl Future<Output = ()>) -> Result<()> {
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("Rapid Rescue dispatcher listening on http://{addr}");

    signal.await;

    info!("Shutting down...");
    server.shutdown().shutdown();
    server.shutdown().drain(vec![handle], None).await;
    info!("Shutdown complete");
    Ok(())
}

async fn serve(settings: RescueSettings) -> Result<()> {
    if !rescue_core::logging::init_subscriber(&settings.logging.level) {
        warn!("tracing subscriber already installed, keeping it");
    }

    let store = open_store(&settings)?;
    let mut server = build_server(&settings, store);
    match rescue_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    run(server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c, shutting down");
        }
    })
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            args.apply(&mut settings);
            serve(settings).await
        }
        Command::Token(args) => {
            println!("{}", issue_token(&settings, &args)?);
            Ok(())
        }
    }
}
