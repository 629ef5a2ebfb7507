//! Fixed-layout request/response header.
//!
//! Every packet on the wire starts with a 64 byte header:
//!
//! ```text
//! offset  size  field
//! 0       4     payload_length (u32, little-endian)
//! 4       1     command tag
//! 5       59    filename, NUL padded
//! ```
//!
//! `payload_length` bytes of payload follow the header immediately.

use crate::error::HeaderError;
use bytes::{Buf, BufMut, BytesMut};
use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;

/// Capacity of the filename field, including the terminating NUL.
pub const FILENAME_SIZE: usize = 59;

/// Size of an encoded header in bytes.
pub const HEADER_SIZE: usize = 4 + 1 + FILENAME_SIZE;

/// Request/response tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Invalid or unrecognized tag. Local sentinel only.
    Error = 0,
    /// Client-local: leave the session.
    Exit = 1,
    /// C->S: fetch a file.
    Get = 2,
    /// Client-local: print usage.
    Help = 3,
    /// C->S: list the server directory.
    Ls = 4,
    /// C->S: upload a file; payload is the file contents.
    Put = 5,
    /// C->S: remove a file.
    Rm = 6,
    /// S->C: reply to GET; payload is the file contents.
    File = 7,
    /// S->C: reply to LS; payload is the listing text.
    LsOut = 8,
    /// S->C: PUT or RM succeeded.
    Ack = 9,
    /// S->C: the request failed.
    Nak = 10,
}

impl Command {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Command::Exit,
            2 => Command::Get,
            3 => Command::Help,
            4 => Command::Ls,
            5 => Command::Put,
            6 => Command::Rm,
            7 => Command::File,
            8 => Command::LsOut,
            9 => Command::Ack,
            10 => Command::Nak,
            _ => Command::Error,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Error => "ERROR",
            Command::Exit => "EXIT",
            Command::Get => "GET",
            Command::Help => "HELP",
            Command::Ls => "LS",
            Command::Put => "PUT",
            Command::Rm => "RM",
            Command::File => "FILE",
            Command::LsOut => "LSOUT",
            Command::Ack => "ACK",
            Command::Nak => "NAK",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A filename guaranteed to fit in the header field with its NUL.
///
/// Holds the raw bytes the client sent. Paths are built from these bytes
/// unchanged; only `Display` renders them lossily as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filename(Vec<u8>);

impl Filename {
    /// Maximum usable length in bytes.
    pub const MAX_LEN: usize = FILENAME_SIZE - 1;

    pub fn new(name: impl Into<String>) -> Result<Self, HeaderError> {
        Self::from_bytes(name.into().into_bytes())
    }

    pub fn from_bytes(name: impl Into<Vec<u8>>) -> Result<Self, HeaderError> {
        let name = name.into();
        if name.len() > Self::MAX_LEN {
            return Err(HeaderError::FilenameTooLong {
                len: name.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Filename(name))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The name as a host path component.
    pub fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a raw field: bytes up to the first NUL, capped at `MAX_LEN`
    /// so a field with no terminator still re-encodes with one.
    fn from_field(field: &[u8]) -> Self {
        let end = field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(field.len())
            .min(Self::MAX_LEN);
        Filename(field[..end].to_vec())
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Control record sent before every payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub payload_length: u32,
    pub command: Command,
    pub filename: Filename,
}

impl Header {
    /// A request carrying a filename and no payload.
    pub fn request(command: Command, filename: Filename) -> Self {
        Self {
            payload_length: 0,
            command,
            filename,
        }
    }

    /// A response with an empty filename field.
    pub fn response(command: Command, payload_length: u32) -> Self {
        Self {
            payload_length,
            command,
            filename: Filename::default(),
        }
    }

    pub fn with_payload_length(mut self, payload_length: u32) -> Self {
        self.payload_length = payload_length;
        self
    }

    /// Append the encoded header to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u32_le(self.payload_length);
        buf.put_u8(self.command.as_u8());
        let name = self.filename.as_bytes();
        buf.put_slice(name);
        buf.put_bytes(0, FILENAME_SIZE - name.len());
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.encode_into(&mut buf);
        let mut block = [0u8; HEADER_SIZE];
        block.copy_from_slice(&buf);
        block
    }

    /// Decode one header block.
    ///
    /// Only the block size is validated. Unknown tags become
    /// [`Command::Error`]; whether a tag/filename pair makes sense is left to
    /// the handlers.
    pub fn decode(mut block: &[u8]) -> Result<Self, HeaderError> {
        if block.len() != HEADER_SIZE {
            return Err(HeaderError::BadLength {
                expected: HEADER_SIZE,
                actual: block.len(),
            });
        }

        let payload_length = block.get_u32_le();
        let command = Command::from_u8(block.get_u8());
        let filename = Filename::from_field(block);

        Ok(Self {
            payload_length,
            command,
            filename,
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, \"{}\"}}",
            self.payload_length, self.command, self.filename
        )
    }
}
