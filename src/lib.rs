//! # LogCrunch - Lightweight Log-Collection SIEM
//!
//! Distributed agents tail host log sources (files, the system journal)
//! and stream structured records over TLS to a central intake server,
//! which indexes them into an embedded relational store and exposes them
//! through an authenticated web UI.
//!
//! ## Architecture
//!
//! ```text
//! source -> tailer -> parser -> channel -> transmitter -> TLS
//!        -> listener -> handler -> (registry update, store write)
//! browser -> auth middleware -> read-only store -> page
//! ```
//!
//! The agent side lives in [`agent`]; the server side spans [`server`]
//! (intake), [`registry`] (live connections), [`storage`] (logs, modules,
//! users) and [`web`] (the authenticated read path). [`parser`] is shared
//! by both processes.

pub mod agent;
pub mod auth;
pub mod domain_types;
pub mod error;
pub mod parser;
pub mod record;
pub mod registry;
pub mod server;
pub mod storage;
pub mod web;

pub use error::{AgentError, AuthError, IntakeError, StorageError};
pub use record::{LogRecord, Parsed};
pub use registry::{ConnectionEntry, ConnectionRegistry};
