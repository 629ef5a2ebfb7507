//! Error types for the cix client and server.
//!
//! Per-connection failures (transport, protocol) never leave the worker that
//! hit them. Only listener failures escape the accept loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Failure moving bytes over a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the stream before any byte of the frame arrived.
    #[error("connection closed by peer")]
    Closed,

    /// The peer closed the stream part way through a frame.
    #[error("unexpected end of stream: expected {expected} bytes, received {received}")]
    UnexpectedEof { expected: usize, received: usize },

    /// A header block could not be decoded.
    #[error("malformed header: {0}")]
    Malformed(#[from] HeaderError),

    /// Any non-recoverable I/O failure (reset, broken pipe, ...).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The block handed to the decoder is not exactly one header long.
    #[error("header block must be {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },

    /// The filename does not fit in the fixed-size header field.
    #[error("filename of {len} bytes exceeds the {max} byte limit")]
    FilenameTooLong { len: usize, max: usize },
}

/// Client session failures that end the session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("local i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker could not be started for an accepted connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpawnError {
    #[error("worker limit of {limit} reached")]
    AtCapacity { limit: usize },
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

/// Server-level failures. Bind errors are fatal to the process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
