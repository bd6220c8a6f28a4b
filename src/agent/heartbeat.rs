//! Periodic proof-of-life records, sharing the transmitter channel with the
//! real log traffic.

use crate::record::{HEARTBEAT_MODULE, LogRecord, Parsed, local_hostname, now_unix};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Emits one liveness record per interval with a monotonically increasing
/// sequence number. The counter increments after each successful send, so a
/// restart restarts the sequence at zero.
pub struct Heartbeat {
    interval: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
        }
    }
}

impl Heartbeat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorter interval for tests.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn beat(seq: u64) -> LogRecord {
        let mut parsed = Map::new();
        parsed.insert("seq".to_string(), Value::from(seq));
        LogRecord {
            name: "self".to_string(),
            path: "self".to_string(),
            host: local_hostname(),
            timestamp: now_unix(),
            module: HEARTBEAT_MODULE.to_string(),
            parsed: Parsed::Fields(parsed),
            raw: seq.to_string(),
        }
    }

    /// Beat until cancelled or the channel closes.
    pub async fn run(self, tx: mpsc::Sender<LogRecord>, cancel: CancellationToken) {
        let mut seq: u64 = 0;
        loop {
            let record = Self::beat(seq);
            tokio::select! {
                () = cancel.cancelled() => return,
                sent = tx.send(record) => {
                    if sent.is_err() {
                        return;
                    }
                    seq += 1;
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
