//! System journal reader: one `journalctl --follow` subscription covering
//! every configured service unit.
//!
//! Entries arrive as JSON field maps. The whole map becomes the record's
//! `raw`; a compact `{message, priority, cmdline}` extraction becomes its
//! `parsed`.

use crate::agent::config::Service;
use crate::error::AgentError;
use crate::record::{LogRecord, Parsed, local_hostname, now_unix};
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const JOURNAL_MODULE: &str = "systemd";

/// Build one record from a journal JSON line, or `None` for lines that are
/// not JSON objects.
fn journal_record(line: &str) -> Option<LogRecord> {
    let fields: Map<String, Value> = serde_json::from_str(line).ok()?;

    let field_str = |key: &str| -> String {
        fields
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let name = {
        let unit = field_str("_SYSTEMD_UNIT");
        if unit.is_empty() {
            let ident = field_str("SYSLOG_IDENTIFIER");
            if ident.is_empty() {
                JOURNAL_MODULE.to_string()
            } else {
                ident
            }
        } else {
            unit
        }
    };

    let priority = fields
        .get("PRIORITY")
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<i64>().ok())
        .unwrap_or(-1);

    let mut parsed = Map::new();
    parsed.insert("message".to_string(), Value::String(field_str("MESSAGE")));
    parsed.insert("priority".to_string(), Value::from(priority));
    parsed.insert("cmdline".to_string(), Value::String(field_str("_CMDLINE")));

    Some(LogRecord {
        name,
        path: JOURNAL_MODULE.to_string(),
        host: local_hostname(),
        timestamp: now_unix(),
        module: JOURNAL_MODULE.to_string(),
        parsed: Parsed::Fields(parsed),
        raw: serde_json::to_string(&fields).unwrap_or_else(|_| line.to_string()),
    })
}

/// Follows the system journal for the configured services.
pub struct JournalReader {
    services: Vec<Service>,
}

impl JournalReader {
    #[must_use]
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    /// Run until cancellation or the journal stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Source`] when `journalctl` cannot be spawned or
    /// its stream ends unexpectedly.
    pub async fn run(
        self,
        tx: mpsc::Sender<LogRecord>,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        if self.services.is_empty() {
            return Ok(());
        }

        let source_err = |reason: String| AgentError::Source {
            name: JOURNAL_MODULE.to_string(),
            path: JOURNAL_MODULE.to_string(),
            reason,
        };

        let mut cmd = Command::new("journalctl");
        cmd.arg("--follow")
            .arg("--output=json")
            .arg("--lines=0")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for service in &self.services {
            cmd.arg("--unit").arg(format!("{}.service", service.key));
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| source_err(format!("cannot spawn journalctl: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| source_err("journalctl stdout not captured".to_string()))?;
        info!(units = self.services.len(), "following system journal");

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    let Some(record) = journal_record(&line) else {
                        warn!("skipping non-JSON journal line");
                        continue;
                    };
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        sent = tx.send(record) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                Ok(None) => {
                    return Err(source_err("journal stream ended".to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "error reading journal line; continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_build_record_from_journal_entry() {
        let line = r#"{"_SYSTEMD_UNIT":"ssh.service","SYSLOG_IDENTIFIER":"sshd","MESSAGE":"Accepted publickey for root","PRIORITY":"6","_CMDLINE":"/usr/sbin/sshd -D"}"#;
        let record = journal_record(line).unwrap();

        assert_eq!(record.module, "systemd");
        assert_eq!(record.path, "systemd");
        assert_eq!(record.name, "ssh.service");
        let fields = record.parsed.fields().unwrap();
        assert_eq!(fields["message"], json!("Accepted publickey for root"));
        assert_eq!(fields["priority"], json!(6));
        assert_eq!(fields["cmdline"], json!("/usr/sbin/sshd -D"));

        // Raw keeps the full field map.
        let raw: Map<String, Value> = serde_json::from_str(&record.raw).unwrap();
        assert_eq!(raw["_SYSTEMD_UNIT"], json!("ssh.service"));
    }

    #[test]
    fn test_should_fall_back_to_syslog_identifier_for_name() {
        let line = r#"{"SYSLOG_IDENTIFIER":"kernel","MESSAGE":"oops"}"#;
        let record = journal_record(line).unwrap();
        assert_eq!(record.name, "kernel");
    }

    #[test]
    fn test_should_map_missing_priority_to_negative_one() {
        let line = r#"{"_SYSTEMD_UNIT":"cron.service","MESSAGE":"tick"}"#;
        let record = journal_record(line).unwrap();
        assert_eq!(record.parsed.fields().unwrap()["priority"], json!(-1));
    }

    #[test]
    fn test_should_skip_non_json_lines() {
        assert!(journal_record("-- Journal begins at ... --").is_none());
    }
}
