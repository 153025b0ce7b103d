//! Error types shared across the acquisition engine.
//!
//! None of these are fatal to the polling loop: fetch and parse errors are
//! absorbed inside a tick, history errors are handed back to the caller so an
//! unwritten record can be retried.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single remote command round trip.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn remote shell: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command timed out after {0} ms")]
    Timeout(u64),

    #[error("remote command exited with status {status}")]
    Failed { status: i32 },

    #[error("remote command returned no output")]
    Empty,

    #[error("not connected to {0}")]
    Disconnected(String),
}

/// Failure to interpret one field of a metrics response.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("{field}: field missing from response")]
    Missing { field: &'static str },

    #[error("{field}: expected at least {expected} values, got {got}")]
    TooFewFields {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{field}: invalid number {token:?}")]
    InvalidNumber { field: &'static str, token: String },
}

/// Failure reading or writing the persisted session history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history log line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Failure loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
