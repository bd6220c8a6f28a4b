//! Intake server: TLS accept loop spawning one handler per connection.

pub mod codec;
pub mod firehose;
pub mod handler;

use crate::error::IntakeError;
use crate::record::{LogRecord, Parsed, local_hostname, now_unix};
use crate::registry::ConnectionRegistry;
use crate::storage::LogStore;
use firehose::Firehose;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Build the acceptor from PEM certificate chain and private key files.
///
/// # Errors
///
/// Returns [`IntakeError::Listener`] for unreadable or invalid material.
pub fn tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, IntakeError> {
    let cert_file = File::open(cert_path)
        .map_err(|e| IntakeError::Listener(format!("cannot open {}: {e}", cert_path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| IntakeError::Listener(format!("bad certificate file: {e}")))?;

    let key_file = File::open(key_path)
        .map_err(|e| IntakeError::Listener(format!("cannot open {}: {e}", key_path.display())))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| IntakeError::Listener(format!("bad key file: {e}")))?
        .ok_or_else(|| {
            IntakeError::Listener(format!("no private key in {}", key_path.display()))
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| IntakeError::Listener(format!("invalid certificate/key pair: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// The server-start record written to the firehose at boot.
#[must_use]
pub fn start_record(host: &str, port: u16) -> LogRecord {
    LogRecord {
        name: "LogCrunch Server".to_string(),
        path: "self".to_string(),
        host: local_hostname(),
        timestamp: now_unix(),
        module: String::new(),
        parsed: Parsed::Absent,
        raw: format!("LogCrunch server starting on {host}:{port}!"),
    }
}

/// Run the accept loop until cancellation. Each accepted connection gets a
/// registry entry (deduplicated by bare IP) and its own handler task.
///
/// # Errors
///
/// This function only returns an error through future extension; accept
/// and handshake failures are logged and the loop continues.
pub async fn run_intake(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    registry: Arc<ConnectionRegistry>,
    store: LogStore,
    firehose: Arc<Firehose>,
    cancel: CancellationToken,
) -> Result<(), IntakeError> {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => {
                info!("intake listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (tcp, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let peer_ip = peer.ip();
        registry.add(peer_ip);
        info!(ip = %peer_ip, "agent connected");

        let acceptor = acceptor.clone();
        let registry = registry.clone();
        let store = store.clone();
        let firehose = firehose.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(ip = %peer_ip, error = %e, "TLS handshake failed");
                    return;
                }
            };
            if let Err(e) =
                handler::handle_connection(stream, peer_ip, registry, store, firehose, token).await
            {
                error!(ip = %peer_ip, error = %e, "handler exited");
            }
        });
    }
}
