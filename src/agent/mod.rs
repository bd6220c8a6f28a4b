//! The host agent: tailers, journal reader and heartbeat feeding one
//! bounded channel, drained by a single TLS transmitter.

pub mod config;
pub mod heartbeat;
pub mod journal;
pub mod tailer;
pub mod tls;
pub mod transmitter;

use crate::domain_types::ChannelCapacity;
use crate::error::AgentError;
use crate::record::LogRecord;
use config::AgentConfig;
use heartbeat::Heartbeat;
use journal::JournalReader;
use std::path::PathBuf;
use tailer::FileTailer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Launch parameters for the agent process.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
    pub verify_certs: bool,
    pub channel_capacity: ChannelCapacity,
}

/// Run the agent until cancellation or a fatal transmit error.
///
/// Targets with invalid configuration are logged and skipped; the rest
/// proceed. A tailer dying takes only itself down. A transmit failure is
/// fatal so a supervisor can restart the whole process.
///
/// # Errors
///
/// Returns [`AgentError`] for an unreadable config, a failed TLS dial, or
/// a transmit failure.
pub async fn run(options: AgentOptions, cancel: CancellationToken) -> Result<(), AgentError> {
    let agent_config = AgentConfig::load(&options.config_path)?;
    info!(
        targets = agent_config.targets.len(),
        services = agent_config.services.len(),
        "agent config loaded"
    );

    let stream = transmitter::connect(&options.host, options.port, options.verify_certs).await?;

    let (tx, rx) = mpsc::channel::<LogRecord>(options.channel_capacity.as_usize());

    {
        let tx = tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            Heartbeat::new().run(tx, token).await;
        });
    }

    for target in agent_config.targets {
        let module = match target.resolve_module() {
            Ok(module) => module,
            Err(e) => {
                warn!(target_name = %target.name, error = %e, "rejecting target");
                continue;
            }
        };
        let tailer = FileTailer::new(target, module);
        let tx = tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tailer.run(tx, token).await {
                error!(error = %e, "tailer exited");
            }
        });
    }

    if !agent_config.services.is_empty() {
        let reader = JournalReader::new(agent_config.services);
        let tx = tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.run(tx, token).await {
                error!(error = %e, "journal reader exited");
            }
        });
    }

    // The transmitter owns the only remaining receiver; drop our sender so
    // the channel closes once every producer is gone.
    drop(tx);
    transmitter::run(stream, rx, cancel).await
}
