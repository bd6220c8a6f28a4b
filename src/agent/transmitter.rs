//! Transmitter: sole owner of the TLS connection's write side.
//!
//! Drains the shared record channel serially and writes each record as one
//! JSON object (newline-terminated) in a single logical write, preserving
//! the channel's FIFO order on the wire. Any write failure stops the agent;
//! a supervisor restart is the recovery path.

use crate::agent::tls;
use crate::error::AgentError;
use crate::record::LogRecord;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Dial the intake server over TLS.
///
/// # Errors
///
/// Returns [`AgentError::Tls`] on connect or handshake failure; the agent
/// exits non-zero in that case.
pub async fn connect(
    host: &str,
    port: u16,
    verify_certs: bool,
) -> Result<TlsStream<TcpStream>, AgentError> {
    let config = tls::client_config(verify_certs)?;
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| AgentError::Tls(format!("cannot connect to {host}:{port}: {e}")))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| AgentError::Tls(format!("invalid server name {host}: {e}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| AgentError::Tls(format!("TLS handshake with {host}:{port} failed: {e}")))?;
    info!(%host, port, "connected to intake server via TLS");
    Ok(stream)
}

async fn write_record<W: AsyncWrite + Unpin>(
    writer: &mut W,
    record: &LogRecord,
) -> Result<(), AgentError> {
    let mut frame = serde_json::to_vec(record)
        .map_err(|e| AgentError::Transmit(std::io::Error::other(e)))?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Drain the channel onto the wire until cancellation or channel close.
///
/// On cancellation, records already queued in the channel are flushed
/// before the stream is shut down. Records still in flight upstream are
/// lost; there is no buffering across reconnects.
///
/// # Errors
///
/// Returns [`AgentError::Transmit`] on the first write failure.
pub async fn run<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<LogRecord>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Flush whatever is already queued, then close cleanly.
                while let Ok(record) = rx.try_recv() {
                    write_record(&mut writer, &record).await?;
                }
                let _ = writer.shutdown().await;
                return Ok(());
            }
            received = rx.recv() => {
                match received {
                    Some(record) => {
                        if let Err(e) = write_record(&mut writer, &record).await {
                            error!(error = %e, "transmit failed; giving up");
                            return Err(e);
                        }
                    }
                    None => {
                        // Every producer is gone.
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
