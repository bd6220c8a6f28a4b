//! Error types for LogCrunch
//!
//! One enum per layer; binaries top out in `anyhow`. Parse failures are not
//! errors at this level: they are annotated into the record itself and the
//! record keeps flowing.

use thiserror::Error;

/// Agent-side errors.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invalid YAML, bad custom regex, or a module reference that does not
    /// resolve in the parser registry. Rejects the offending target only.
    #[error("config error for target {target}: {reason}")]
    Config { target: String, reason: String },

    #[error("cannot read config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Irrecoverable failure of one source; the tailer exits, others continue.
    #[error("source error for {name} ({path}): {reason}")]
    Source {
        name: String,
        path: String,
        reason: String,
    },

    /// Any failure on the TLS write side. Fatal to the agent process.
    #[error("transmit error: {0}")]
    Transmit(#[from] std::io::Error),

    #[error("TLS setup error: {0}")]
    Tls(String),
}

/// Server intake errors.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("TLS listener error: {0}")]
    Listener(String),

    /// Malformed JSON on the stream. The handler closes the connection
    /// rather than attempting to resync mid-stream.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the log/module store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row carried a NULL or undecodable `parsed` column. Reported per
    /// row, never silently replaced by an empty map.
    #[error("bad parsed column in row: {0}")]
    BadParsedColumn(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the auth/session layer.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("password hashing failed: {0}")]
    Hash(String),

    /// Empty users table while the setup sentinel already exists.
    #[error("no users exist but the setup sentinel is present; refusing to re-run first-time setup")]
    SetupTampering,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
