//! cix: a small client/server file transfer protocol.
//!
//! Every packet is a fixed 64 byte [`header::Header`] followed by
//! `payload_length` bytes of payload. The client issues one request at a
//! time (`ls`, `get`, `put`, `rm`); the server answers each with exactly one
//! response, running one isolated worker task per connection.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod header;
pub mod logging;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use error::{ClientError, ServerError, TransportError};
pub use header::{Command, Filename, Header, FILENAME_SIZE, HEADER_SIZE};
