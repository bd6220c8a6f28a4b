//! File tailer: one long-running task per configured target.
//!
//! Follow semantics: start at current EOF, pick up appended lines, reseek to
//! zero on truncation, reopen on rotation (inode change), and wait quietly
//! for files that do not exist yet. Backpressure is a blocking send on the
//! shared record channel; lines are never dropped.

use crate::agent::config::Target;
use crate::error::AgentError;
use crate::parser::{self, ParserModule};
use crate::record::{LogRecord, Parsed, local_hostname, now_unix};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Stable identity of an open file, used to detect rotation.
#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// Tails one target file and emits a parsed record per line.
pub struct FileTailer {
    target: Target,
    module: Option<ParserModule>,
    poll_interval: Duration,
}

impl FileTailer {
    #[must_use]
    pub fn new(target: Target, module: Option<ParserModule>) -> Self {
        Self {
            target,
            module,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Shorter poll interval for tests.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn make_record(&self, raw: String) -> LogRecord {
        let (module, parsed) = match &self.module {
            Some(m) => (
                self.target.module_name(),
                match parser::meta_parse(&raw, m) {
                    Ok(fields) => Parsed::Fields(fields),
                    Err(e) => Parsed::Error(e.to_string()),
                },
            ),
            None => (String::new(), Parsed::Absent),
        };

        LogRecord {
            name: self.target.name.clone(),
            path: self.target.path.clone(),
            host: local_hostname(),
            timestamp: now_unix(),
            module,
            parsed,
            raw,
        }
    }

    /// Sleep one poll interval, returning `false` if cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    /// Open the target, waiting while it does not exist yet.
    ///
    /// Returns `Ok(None)` when cancelled while waiting.
    async fn open_when_present(
        &self,
        path: &PathBuf,
        cancel: &CancellationToken,
    ) -> Result<Option<File>, AgentError> {
        loop {
            match File::open(path).await {
                Ok(file) => return Ok(Some(file)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !self.pause(cancel).await {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    return Err(AgentError::Source {
                        name: self.target.name.clone(),
                        path: self.target.path.clone(),
                        reason: format!("cannot open source: {e}"),
                    });
                }
            }
        }
    }

    /// Run the follow loop until cancellation or an irrecoverable source
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Source`] when the file cannot be opened for a
    /// reason other than not existing yet. Other tailers are unaffected.
    pub async fn run(
        self,
        tx: mpsc::Sender<LogRecord>,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        let path = PathBuf::from(&self.target.path);

        let Some(file) = self.open_when_present(&path, &cancel).await? else {
            return Ok(());
        };
        let mut reader = BufReader::new(file);

        // Begin from current EOF: history is not replayed.
        let mut pos = reader.seek(SeekFrom::End(0)).await.map_err(|e| self.io_source(&e))?;
        let mut current_id = self.open_file_id(&reader).await?;
        info!(target_name = %self.target.name, path = %self.target.path, "tailing from offset {pos}");

        // Bytes of an unterminated final line, held until the rest arrives.
        let mut pending: Vec<u8> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let mut chunk: Vec<u8> = Vec::new();
            match reader.read_until(b'\n', &mut chunk).await {
                Ok(0) => {
                    // At EOF: look for truncation or rotation before idling.
                    match tokio::fs::metadata(&path).await {
                        Ok(meta) if file_id(&meta) != current_id => {
                            debug!(target_name = %self.target.name, "source rotated; reopening");
                            let Some(file) = self.open_when_present(&path, &cancel).await? else {
                                return Ok(());
                            };
                            reader = BufReader::new(file);
                            pos = 0;
                            current_id = self.open_file_id(&reader).await?;
                            pending.clear();
                        }
                        Ok(meta) if meta.len() < pos => {
                            debug!(target_name = %self.target.name, "source truncated; reseeking");
                            pos = reader
                                .seek(SeekFrom::Start(0))
                                .await
                                .map_err(|e| self.io_source(&e))?;
                            pending.clear();
                        }
                        Ok(_) | Err(_) => {
                            // Nothing new (or the file vanished mid-rotation;
                            // the next pass will reopen it once recreated).
                            if !self.pause(&cancel).await {
                                return Ok(());
                            }
                        }
                    }
                }
                Ok(n) => {
                    pos += n as u64;
                    if chunk.last() != Some(&b'\n') {
                        // Partial line; wait for the writer to finish it.
                        pending.extend_from_slice(&chunk);
                        continue;
                    }
                    let mut line = std::mem::take(&mut pending);
                    line.extend_from_slice(&chunk);
                    let text = String::from_utf8_lossy(&line);
                    let raw = text.trim_end_matches(['\n', '\r']).to_string();

                    let record = self.make_record(raw);
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        sent = tx.send(record) => {
                            if sent.is_err() {
                                // Transmitter is gone; nothing left to feed.
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(target_name = %self.target.name, error = %e, "error reading line; continuing");
                    if !self.pause(&cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn open_file_id(&self, reader: &BufReader<File>) -> Result<u64, AgentError> {
        let meta = reader
            .get_ref()
            .metadata()
            .await
            .map_err(|e| self.io_source(&e))?;
        Ok(file_id(&meta))
    }

    fn io_source(&self, e: &std::io::Error) -> AgentError {
        AgentError::Source {
            name: self.target.name.clone(),
            path: self.target.path.clone(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_target(path: &std::path::Path) -> Target {
        Target {
            name: "AuthLog".to_string(),
            path: path.display().to_string(),
            severity: "info".to_string(),
            custom: false,
            module: Some("syslog".to_string()),
            regex: None,
            schema: None,
        }
    }

    fn spawn_tailer(
        target: Target,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<LogRecord> {
        let module = target.resolve_module().unwrap();
        let tailer =
            FileTailer::new(target, module).with_poll_interval(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel(16);
        let token = cancel.clone();
        tokio::spawn(async move {
            let _ = tailer.run(tx, token).await;
        });
        rx
    }

    async fn recv_one(rx: &mut mpsc::Receiver<LogRecord>) -> LogRecord {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for record")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_should_emit_appended_lines_but_not_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "Jul 29 12:00:00 old cron: history line\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tailer(test_target(&path), &cancel);

        // Give the tailer a moment to seek to EOF before appending.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Jul 29 12:34:56 myhost cron: Job started.").unwrap();
        file.sync_all().unwrap();

        let record = recv_one(&mut rx).await;
        assert_eq!(record.raw, "Jul 29 12:34:56 myhost cron: Job started.");
        assert_eq!(record.module, "syslog");
        assert!(record.timestamp > 0);
        let fields = record.parsed.fields().expect("line should parse");
        assert_eq!(fields["host"], serde_json::json!("myhost"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_should_wait_for_missing_file_then_tail_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.log");

        let cancel = CancellationToken::new();
        let mut rx = spawn_tailer(test_target(&path), &cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::File::create(&path).unwrap();
        // Let the tailer pick the file up at EOF before appending.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Jul 29 01:02:03 host sshd[9]: accepted").unwrap();
        file.sync_all().unwrap();

        let record = recv_one(&mut rx).await;
        assert_eq!(record.raw, "Jul 29 01:02:03 host sshd[9]: accepted");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_should_resume_from_start_after_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.log");
        // Noticeably longer than the replacement so the shrink is
        // unambiguous to the size check.
        let history = format!("Jul 29 00:00:00 h cron: {}\n", "x".repeat(300));
        std::fs::write(&path, history).unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tailer(test_target(&path), &cancel);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Truncate and write fresh content from offset zero.
        std::fs::write(&path, "Jul 29 09:00:00 h cron: after truncate\n").unwrap();

        let record = recv_one(&mut rx).await;
        assert_eq!(record.raw, "Jul 29 09:00:00 h cron: after truncate");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_should_annotate_unparseable_lines_and_still_emit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.log");
        std::fs::write(&path, "").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_tailer(test_target(&path), &cancel);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "this is not a valid syslog line ::::").unwrap();
        file.sync_all().unwrap();

        let record = recv_one(&mut rx).await;
        assert_eq!(
            record.parsed,
            Parsed::Error("no match".to_string()),
            "parse failure must be annotated, not dropped"
        );

        cancel.cancel();
    }
}
