//! Hivelink Server
//!
//! HTTP API for identity linking and sponsored chain accounts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use hivelink_core::config::load_config;
use hivelink_core::tracing_init::init_tracing;
use hivelink_crypto::CredentialVault;
use hivelink_server::chain::HiveRpcClient;
use hivelink_server::directory::NeynarDirectory;
use hivelink_server::notify::ResendMailer;
use hivelink_server::server::{AppState, Collaborators, build_router};
use hivelink_server::sponsorship::SponsorshipService;
use hivelink_server::storage::AppDatabase;

#[derive(Parser)]
#[command(name = "hivelink-server")]
#[command(
    version,
    about = "Hivelink server - identity linking and sponsored chain accounts"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "HIVELINK_ADDR")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "HIVELINK_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Path to JSON config file.
    #[arg(long, env = "HIVELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Hide internal error detail from API responses.
    #[arg(long)]
    production: bool,

    /// Master secret for the credential vault (64 hex chars or a passphrase).
    #[arg(long, env = "HIVELINK_VAULT_KEY", hide_env_values = true)]
    vault_key: String,

    /// API key for the social-graph directory.
    #[arg(long, env = "HIVELINK_DIRECTORY_API_KEY", hide_env_values = true)]
    directory_api_key: String,

    /// API key for the email service.
    #[arg(long, env = "HIVELINK_EMAIL_API_KEY", hide_env_values = true)]
    email_api_key: String,

    /// OTLP endpoint for traces and metrics.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "HIVELINK_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("hivelink_server=info,tower_http=info", args.log_json);

    #[cfg(feature = "metrics")]
    let metrics_guard = match &args.otlp_endpoint {
        Some(endpoint) => Some(hivelink_core::metrics::init_metrics(endpoint)?),
        None => None,
    };

    let mut config = load_config(args.config.as_deref())?;
    if args.production {
        config.server.production = true;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        production = config.server.production,
        "Starting hivelink-server"
    );

    let db_path = match args.db_path {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = %db_path.display(), "Opening database");
    let db = AppDatabase::open(&db_path).await?;

    let vault = Arc::new(CredentialVault::from_master_secret(&args.vault_key)?);
    let chain = Arc::new(HiveRpcClient::new(&config.chain)?);
    let services = Collaborators {
        directory: Arc::new(NeynarDirectory::new(&config.directory, args.directory_api_key)?),
        chain: chain.clone(),
        publisher: chain,
        notifier: Arc::new(ResendMailer::new(&config.email, args.email_api_key)?),
    };
    let state = AppState::new(db, services, vault, &config.server);

    spawn_stale_sweep(state.sponsorships.clone(), config.server.stale_processing_secs);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard {
        guard.shutdown()?;
    }

    info!("Server stopped");
    Ok(())
}

/// Fail interrupted sponsorships now and then hourly.
fn spawn_stale_sweep(sponsorships: SponsorshipService, stale_secs: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            // First tick fires immediately, covering startup.
            interval.tick().await;
            match sponsorships.sweep_stale(stale_secs).await {
                Ok(swept) if swept > 0 => info!(swept, "Stale sponsorship sweep completed"),
                Err(e) => warn!(error = %e, "Stale sponsorship sweep failed"),
                _ => {}
            }
        }
    });
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".hivelink").join("hivelink.db"))
}
