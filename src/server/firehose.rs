//! The firehose: an append-only file of every raw incoming JSON record,
//! kept for forensic replay. Rotated once at startup.

use crate::record::LogRecord;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Append-mode handle shared by all connection handlers.
#[derive(Debug)]
pub struct Firehose {
    file: Mutex<tokio::fs::File>,
}

impl Firehose {
    /// Rotate any existing firehose into `old_path` (append mode), then open
    /// a fresh file for this run.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; a server that cannot write its
    /// firehose does not start.
    pub async fn open(path: &Path, old_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(path).await? {
            let previous = tokio::fs::read(path).await?;
            if !previous.is_empty() {
                let mut old = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(old_path)
                    .await?;
                old.write_all(&previous).await?;
                old.flush().await?;
            }
            tokio::fs::remove_file(path).await?;
            info!(from = %path.display(), to = %old_path.display(), "rotated firehose");
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; callers log and keep the
    /// connection going.
    pub async fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await
    }
}

/// Read a firehose capture back into records, for forensic replay.
///
/// A missing file is an empty capture, not an error; lines that fail to
/// decode are skipped with a warning so one corrupt line cannot hide the
/// rest of the evidence.
///
/// # Errors
///
/// Returns the underlying I/O error when the file exists but cannot be
/// read.
pub async fn read_records(path: &Path) -> std::io::Result<Vec<LogRecord>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping undecodable firehose line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Parsed, now_unix};

    fn record(raw: &str) -> LogRecord {
        LogRecord {
            name: "t".to_string(),
            path: "/var/log/t.log".to_string(),
            host: "h".to_string(),
            timestamp: now_unix(),
            module: String::new(),
            parsed: Parsed::Absent,
            raw: raw.to_string(),
        }
    }

    #[tokio::test]
    async fn test_should_append_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firehose.log");
        let old = dir.path().join("old_firehose.log");

        let firehose = Firehose::open(&path, &old).await.unwrap();
        firehose.append(&record("one")).await.unwrap();
        firehose.append(&record("two")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.raw, "one");
    }

    #[tokio::test]
    async fn test_should_replay_capture_skipping_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firehose.log");
        let old = dir.path().join("old_firehose.log");

        let firehose = Firehose::open(&path, &old).await.unwrap();
        firehose.append(&record("first")).await.unwrap();
        firehose.append(&record("second")).await.unwrap();

        // Corrupt the middle of the capture by hand.
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "garbage that is not json").unwrap();
        }
        firehose.append(&record("third")).await.unwrap();

        let records = read_records(&path).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].raw, "first");
        assert_eq!(records[2].raw, "third");
    }

    #[tokio::test]
    async fn test_should_treat_missing_capture_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(&dir.path().join("nope.log")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_should_rotate_previous_firehose_into_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firehose.log");
        let old = dir.path().join("old_firehose.log");
        std::fs::write(&path, "previous run\n").unwrap();
        std::fs::write(&old, "ancient run\n").unwrap();

        let firehose = Firehose::open(&path, &old).await.unwrap();
        firehose.append(&record("fresh")).await.unwrap();

        // Old file accumulates, append mode.
        let old_content = std::fs::read_to_string(&old).unwrap();
        assert!(old_content.starts_with("ancient run\n"));
        assert!(old_content.contains("previous run"));

        // New file only has this run's records.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
