//! LogCrunch intake server.
//!
//! Accepts TLS log streams from agents on one endpoint and serves the
//! authenticated web UI on another.

use anyhow::Result;
use clap::Parser;
use logcrunch::registry::ConnectionRegistry;
use logcrunch::server::firehose::Firehose;
use logcrunch::storage::{self, UserStore, module_store};
use logcrunch::web::{self, WebState};
use logcrunch::{auth, server};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const FIREHOSE_PATH: &str = "/var/log/LogCrunch/firehose.log";
const OLD_FIREHOSE_PATH: &str = "/var/log/LogCrunch/old_firehose.log";
const LOG_DB_PATH: &str = "/var/log/LogCrunch/logcrunch.db";
const USER_DB_PATH: &str = "/opt/LogCrunch/users/accounts.db";
const SETUP_SENTINEL_PATH: &str = "/opt/LogCrunch/users/.setupCompleted";
const STATIC_DIR: &str = "/opt/LogCrunch/static";

#[derive(Parser, Debug)]
#[command(
    name = "logcrunch-server",
    about = "LogCrunch intake server: TLS log intake plus web UI"
)]
struct Cli {
    /// Address for TLS log intake.
    log_host: String,
    /// Port for TLS log intake.
    log_port: u16,
    /// TLS certificate chain (PEM).
    cert_path: PathBuf,
    /// TLS private key (PEM).
    key_path: PathBuf,
    /// Address for the web UI.
    #[arg(default_value = "localhost")]
    http_host: String,
    /// Port for the web UI.
    #[arg(default_value_t = 8080)]
    http_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("logcrunch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!(
        "starting LogCrunch server: intake {}:{}, web {}:{}",
        cli.log_host, cli.log_port, cli.http_host, cli.http_port
    );

    // Firehose first: rotate last run's capture, then note this boot.
    let firehose = Arc::new(
        Firehose::open(Path::new(FIREHOSE_PATH), Path::new(OLD_FIREHOSE_PATH)).await?,
    );
    firehose
        .append(&server::start_record(&cli.log_host, cli.log_port))
        .await?;

    let (log_store, ro_store) = storage::open_log_stores(Path::new(LOG_DB_PATH)).await?;
    module_store::seed_registry(&log_store).await?;

    let users = UserStore::open(Path::new(USER_DB_PATH)).await?;
    auth::first_time_setup(&users, Path::new(SETUP_SENTINEL_PATH)).await?;

    let registry = Arc::new(ConnectionRegistry::new());
    let cancel = CancellationToken::new();

    // Expired session rows pile up silently; sweep them hourly.
    {
        let users = users.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }
                match users.clean_expired_sessions().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "dropped expired sessions"),
                    Err(e) => error!(error = %e, "session sweep failed"),
                }
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    // Web UI runs beside the intake loop on its own endpoint.
    {
        let state = WebState {
            registry: registry.clone(),
            logs: ro_store,
            users,
            static_dir: PathBuf::from(STATIC_DIR),
        };
        let host = cli.http_host.clone();
        let port = cli.http_port;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(&host, port, state, cancel).await {
                error!(error = %e, "web server failed");
            }
        });
    }

    let acceptor = server::tls_acceptor(&cli.cert_path, &cli.key_path)?;
    let listener = TcpListener::bind((cli.log_host.as_str(), cli.log_port)).await?;
    info!("TLS intake listening on {}:{}", cli.log_host, cli.log_port);

    server::run_intake(listener, acceptor, registry, log_store, firehose, cancel).await?;

    info!("LogCrunch server shut down");
    Ok(())
}
