//! Interactive client session.
//!
//! Each input line becomes at most one request/response exchange. Local
//! preconditions (filename length, local file presence) are checked before
//! anything is sent, so a rejected command never touches the connection.

use crate::dispatch::CommandWords;
use crate::error::ClientError;
use crate::header::{Command, Filename, Header};
use crate::transport::{recv_exact, recv_header, send_header, send_packet};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const HELP: &str = "\
exit         - Exit the program.  Equivalent to EOF.
get filename - Copy remote file to local host.
help         - Print help summary.
ls           - List names of files on remote server.
put filename - Copy local file to remote host.
rm filename  - Remove file from remote server.
";

/// Why a command was refused before contacting the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingFilename,
    NameTooLong { len: usize },
    LocalFileExists,
    LocalFileUnreadable(String),
    FileTooLarge { len: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingFilename => write!(f, "invalid filename"),
            Rejection::NameTooLong { len } => write!(
                f,
                "filename of {len} bytes is too long (limit {} bytes)",
                Filename::MAX_LEN
            ),
            Rejection::LocalFileExists => write!(f, "file exists on local machine"),
            Rejection::LocalFileUnreadable(e) => write!(f, "cannot read local file: {e}"),
            Rejection::FileTooLarge { len } => write!(f, "file of {len} bytes is too large"),
        }
    }
}

/// Result of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Blank line.
    Nothing,
    Help,
    Exit,
    Listing(String),
    Downloaded { name: String, bytes: usize },
    Uploaded { name: String, bytes: usize },
    Removed { name: String },
    /// Refused locally; nothing was sent.
    Rejected { name: String, reason: Rejection },
    /// The server answered with something other than the expected tag.
    Failed {
        request: Command,
        name: String,
        reply: Command,
    },
    /// The reply arrived but the local file could not be written.
    LocalWriteFailed { name: String, error: String },
    /// The command word is not known.
    Invalid(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Nothing | Outcome::Exit => Ok(()),
            Outcome::Help => f.write_str(HELP),
            Outcome::Listing(text) => f.write_str(text),
            Outcome::Downloaded { name, bytes } => write!(f, "{name}: received {bytes} bytes"),
            Outcome::Uploaded { name, bytes } => write!(f, "{name}: sent {bytes} bytes"),
            Outcome::Removed { name } => write!(f, "{name}: removed"),
            Outcome::Rejected { name, reason } => write!(f, "{name}: {reason}"),
            Outcome::Failed {
                request,
                name,
                reply,
            } => write!(f, "{request} {name}: server replied {reply}"),
            Outcome::LocalWriteFailed { name, error } => write!(f, "{name}: {error}"),
            Outcome::Invalid(line) => write!(f, "{line}: invalid command"),
        }
    }
}

/// Split a line into its command word and the rest (the filename).
///
/// Surrounding whitespace is trimmed; the filename is everything after the
/// first space and may itself contain spaces. Lines are raw bytes: names
/// need not be valid UTF-8.
pub fn parse_line(line: &[u8]) -> (&[u8], &[u8]) {
    let line = trim(line);
    match line.iter().position(|&b| b == b' ') {
        Some(space) => (&line[..space], &line[space + 1..]),
        None => (line, &[]),
    }
}

fn trim(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

fn text(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// One connection to a server plus the local directory files live in.
pub struct Session<S> {
    conn: S,
    dir: PathBuf,
    words: CommandWords,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: S, dir: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            dir: dir.into(),
            words: CommandWords::new(),
        }
    }

    fn local_path(&self, name: &[u8]) -> PathBuf {
        self.dir.join(OsStr::from_bytes(name))
    }

    /// Execute one input line.
    ///
    /// Errors are transport failures; the session cannot continue after one.
    pub async fn execute(&mut self, line: impl AsRef<[u8]>) -> Result<Outcome, ClientError> {
        let line = line.as_ref();
        let (word, name) = parse_line(line);
        if word.is_empty() {
            return Ok(Outcome::Nothing);
        }

        let command = std::str::from_utf8(word)
            .map(|word| self.words.lookup(word))
            .unwrap_or(Command::Error);

        match command {
            Command::Exit => Ok(Outcome::Exit),
            Command::Help => Ok(Outcome::Help),
            Command::Ls => self.ls().await,
            Command::Get => self.get(name).await,
            Command::Put => self.put(name).await,
            Command::Rm => self.rm(name).await,
            _ => Ok(Outcome::Invalid(text(trim(line)).into_owned())),
        }
    }

    pub async fn ls(&mut self) -> Result<Outcome, ClientError> {
        let header = Header::request(Command::Ls, Filename::default());
        let reply = self.exchange(&header, &[]).await?;

        if reply.command != Command::LsOut {
            warn!(reply = %reply, "sent LS, server did not return LSOUT");
            return Ok(failed(Command::Ls, b"", reply.command));
        }

        let listing = recv_exact(&mut self.conn, reply.payload_length as usize).await?;
        debug!(bytes = listing.len(), "received listing");
        Ok(Outcome::Listing(
            String::from_utf8_lossy(&listing).into_owned(),
        ))
    }

    pub async fn get(&mut self, name: &[u8]) -> Result<Outcome, ClientError> {
        if name.is_empty() {
            return Ok(rejected(name, Rejection::MissingFilename));
        }
        let filename = match checked_name(name) {
            Ok(filename) => filename,
            Err(outcome) => return Ok(outcome),
        };
        let path = self.local_path(name);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok(rejected(name, Rejection::LocalFileExists));
        }

        let reply = self
            .exchange(&Header::request(Command::Get, filename), &[])
            .await?;
        if reply.command != Command::File {
            warn!(file = %text(name), reply = %reply, "get failed");
            return Ok(failed(Command::Get, name, reply.command));
        }

        let data = recv_exact(&mut self.conn, reply.payload_length as usize).await?;
        debug!(file = %text(name), bytes = data.len(), "download finished");

        if let Err(e) = write_new(&path, &data).await {
            warn!(file = %text(name), error = %e, "cannot write downloaded file");
            return Ok(Outcome::LocalWriteFailed {
                name: text(name).into_owned(),
                error: e.to_string(),
            });
        }

        Ok(Outcome::Downloaded {
            name: text(name).into_owned(),
            bytes: data.len(),
        })
    }

    pub async fn put(&mut self, name: &[u8]) -> Result<Outcome, ClientError> {
        let filename = match checked_name(name) {
            Ok(filename) => filename,
            Err(outcome) => return Ok(outcome),
        };
        let data = match tokio::fs::read(self.local_path(name)).await {
            Ok(data) => data,
            Err(e) => return Ok(rejected(name, Rejection::LocalFileUnreadable(e.to_string()))),
        };
        let Ok(len) = u32::try_from(data.len()) else {
            return Ok(rejected(name, Rejection::FileTooLarge { len: data.len() }));
        };

        let header = Header::request(Command::Put, filename).with_payload_length(len);
        let reply = self.exchange(&header, &data).await?;
        if reply.command != Command::Ack {
            warn!(file = %text(name), reply = %reply, "upload failed");
            return Ok(failed(Command::Put, name, reply.command));
        }

        Ok(Outcome::Uploaded {
            name: text(name).into_owned(),
            bytes: data.len(),
        })
    }

    pub async fn rm(&mut self, name: &[u8]) -> Result<Outcome, ClientError> {
        let filename = match checked_name(name) {
            Ok(filename) => filename,
            Err(outcome) => return Ok(outcome),
        };

        let reply = self
            .exchange(&Header::request(Command::Rm, filename), &[])
            .await?;
        if reply.command != Command::Ack {
            warn!(file = %text(name), reply = %reply, "server failed to remove file");
            return Ok(failed(Command::Rm, name, reply.command));
        }

        Ok(Outcome::Removed {
            name: text(name).into_owned(),
        })
    }

    /// Send one request and read back one response header.
    async fn exchange(&mut self, header: &Header, payload: &[u8]) -> Result<Header, ClientError> {
        debug!(%header, "sending header");
        if payload.is_empty() {
            send_header(&mut self.conn, header).await?;
        } else {
            send_packet(&mut self.conn, header, payload).await?;
        }
        let reply = recv_header(&mut self.conn).await?;
        debug!(header = %reply, "received header");
        Ok(reply)
    }
}

fn checked_name(name: &[u8]) -> Result<Filename, Outcome> {
    Filename::from_bytes(name)
        .map_err(|_| rejected(name, Rejection::NameTooLong { len: name.len() }))
}

fn rejected(name: &[u8], reason: Rejection) -> Outcome {
    warn!(file = %text(name), %reason, "command rejected locally");
    Outcome::Rejected {
        name: text(name).into_owned(),
        reason,
    }
}

fn failed(request: Command, name: &[u8], reply: Command) -> Outcome {
    Outcome::Failed {
        request,
        name: text(name).into_owned(),
        reply,
    }
}

async fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

/// Drive a session from line-oriented input until `exit` or end of input.
///
/// Help text and listings go to `output`; everything else is logged. A line
/// that is not valid UTF-8 is still executed byte for byte.
pub async fn run<S, R, W>(
    session: &mut Session<S>,
    mut input: R,
    mut output: W,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        debug!(line = %text(trim(&line)), "command");
        let outcome = session.execute(&line).await?;
        match &outcome {
            Outcome::Exit => break,
            Outcome::Nothing => {}
            Outcome::Help | Outcome::Listing(_) => {
                output.write_all(outcome.to_string().as_bytes()).await?;
                output.flush().await?;
            }
            Outcome::Downloaded { .. } | Outcome::Uploaded { .. } | Outcome::Removed { .. } => {
                info!("{outcome}");
            }
            _ => warn!("{outcome}"),
        }
    }

    info!("finishing");
    Ok(())
}
