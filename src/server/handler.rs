//! Per-connection intake loop: decode records off the TLS stream, keep the
//! registry fresh, append to the firehose, insert into the store.

use crate::error::IntakeError;
use crate::record::LogRecord;
use crate::registry::ConnectionRegistry;
use crate::server::codec::JsonFrameDecoder;
use crate::server::firehose::Firehose;
use crate::storage::LogStore;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const READ_BUF_SIZE: usize = 8192;

struct ConnectionState {
    peer_ip: IpAddr,
    registry: Arc<ConnectionRegistry>,
    store: LogStore,
    firehose: Arc<Firehose>,
    hostname_seen: bool,
}

impl ConnectionState {
    async fn process(&mut self, record: LogRecord) {
        // The first decoded record names the connection.
        let hostname = (!self.hostname_seen).then(|| record.host.clone());
        self.hostname_seen = true;
        self.registry.record_seen(self.peer_ip, hostname.as_deref());

        if let Err(e) = self.firehose.append(&record).await {
            warn!(ip = %self.peer_ip, error = %e, "firehose append failed");
        }

        // A failed insert drops this record but keeps the connection alive.
        if let Err(e) = self.store.insert_log(&record).await {
            warn!(ip = %self.peer_ip, error = %e, "insert failed; dropping record");
        }
    }
}

/// Drive one connection until EOF, decode failure, or cancellation.
///
/// On cancellation the decoder is drained of already-buffered records
/// before the handler exits.
///
/// # Errors
///
/// Returns [`IntakeError`] for stream I/O failures and malformed JSON; the
/// caller logs and lets the connection die.
pub async fn handle_connection<R>(
    mut reader: R,
    peer_ip: IpAddr,
    registry: Arc<ConnectionRegistry>,
    store: LogStore,
    firehose: Arc<Firehose>,
    cancel: CancellationToken,
) -> Result<(), IntakeError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = JsonFrameDecoder::new();
    let mut state = ConnectionState {
        peer_ip,
        registry,
        store,
        firehose,
        hostname_seen: false,
    };
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = tokio::select! {
            () = cancel.cancelled() => {
                while let Ok(Some(record)) = decoder.next_record() {
                    state.process(record).await;
                }
                return Ok(());
            }
            read = reader.read(&mut buf) => read?,
        };

        if n == 0 {
            if !decoder.is_drained() {
                warn!(ip = %peer_ip, "stream ended mid-record; discarding partial frame");
            }
            info!(ip = %peer_ip, "connection closed");
            return Ok(());
        }

        decoder.push(&buf[..n]);
        loop {
            match decoder.next_record() {
                Ok(Some(record)) => state.process(record).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(ip = %peer_ip, error = %e, "decode error; closing connection");
                    return Err(IntakeError::Decode(e));
                }
            }
        }
    }
}
