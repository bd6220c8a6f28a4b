//! LogCrunch host agent.
//!
//! Tails the configured sources and streams parsed records to the intake
//! server over TLS. Exits non-zero on a bad invocation, a failed dial, an
//! unreadable config, or a transmit failure; a supervisor restarts it.

use anyhow::Result;
use clap::Parser;
use logcrunch::agent::{self, AgentOptions};
use logcrunch::domain_types::ChannelCapacity;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the shared record channel. Blocking producers absorb
/// bursts; raising this trades memory for latency headroom.
fn channel_capacity() -> ChannelCapacity {
    match std::env::var("LOGCRUNCH_CHANNEL_CAPACITY") {
        Ok(raw) => raw
            .parse::<usize>()
            .ok()
            .and_then(|n| ChannelCapacity::try_new(n).ok())
            .unwrap_or_else(|| {
                warn!(value = %raw, "ignoring invalid LOGCRUNCH_CHANNEL_CAPACITY");
                ChannelCapacity::default_capacity()
            }),
        Err(_) => ChannelCapacity::default_capacity(),
    }
}

fn parse_verify_certs(value: &str) -> Result<bool, String> {
    match value {
        "y" => Ok(true),
        "n" => Ok(false),
        _ => Err("expected 'y' or 'n'".to_string()),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "logcrunch-agent",
    about = "LogCrunch host agent: tails log sources and streams them to the intake server"
)]
struct Cli {
    /// Intake server host.
    host: String,
    /// Intake server port.
    port: u16,
    /// YAML file declaring targets and services.
    config_file: PathBuf,
    /// Verify the server certificate chain: y or n (n is lab-only).
    #[arg(value_parser = parse_verify_certs)]
    verify_certs: bool,
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
    info!(host = %cli.host, port = cli.port, verify_certs = cli.verify_certs, "starting agent");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let options = AgentOptions {
        host: cli.host,
        port: cli.port,
        config_path: cli.config_file,
        verify_certs: cli.verify_certs,
        channel_capacity: channel_capacity(),
    };
    agent::run(options, cancel).await?;

    info!("agent shut down");
    Ok(())
}
