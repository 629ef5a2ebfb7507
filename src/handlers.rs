//! Server-side command handlers.
//!
//! Each handler turns one decoded request into exactly one reply. Resource
//! failures (missing file, permission denied, listing failure) become a NAK;
//! they never escape the handler.

use crate::header::{Command, Filename, Header};
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command as Process;
use tracing::{debug, info, warn};

/// A request as seen by a handler. For PUT, `payload` holds the uploaded
/// bytes; it is empty otherwise.
#[derive(Debug, Clone)]
pub struct Request {
    pub header: Header,
    pub payload: Bytes,
}

impl Request {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }
}

/// A reply header and the payload that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: Header,
    pub payload: Bytes,
}

impl Reply {
    pub fn ack() -> Self {
        Self::bare(Command::Ack, 0)
    }

    pub fn nak() -> Self {
        Self::bare(Command::Nak, 0)
    }

    /// NAK carrying an OS error code in `payload_length`.
    pub fn nak_with_code(code: u32) -> Self {
        Self::bare(Command::Nak, code)
    }

    /// A reply carrying `payload`, or `None` when its length does not fit
    /// the header's 32-bit `payload_length`.
    pub fn with_payload(command: Command, payload: Bytes) -> Option<Self> {
        let payload_length = payload_length(payload.len())?;
        Some(Self {
            header: Header::response(command, payload_length),
            payload,
        })
    }

    fn bare(command: Command, payload_length: u32) -> Self {
        Self {
            header: Header::response(command, payload_length),
            payload: Bytes::new(),
        }
    }
}

/// Length of a payload as sent in a header, if it fits.
pub fn payload_length(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// Output of the host listing command.
#[derive(Debug)]
pub struct Listing {
    pub output: Bytes,
    pub status: ExitStatus,
}

/// Host file store rooted at one directory.
///
/// Names are joined onto the root exactly as the client sent them.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    listing_command: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, listing_command: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            listing_command: listing_command.into(),
        }
    }

    pub fn path(&self, name: &Filename) -> PathBuf {
        self.root.join(name.as_os_str())
    }

    /// Run the listing command through the shell in the store root.
    pub async fn list(&self) -> io::Result<Listing> {
        let output = Process::new("sh")
            .arg("-c")
            .arg(&self.listing_command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(Listing {
            output: Bytes::from(output.stdout),
            status: output.status,
        })
    }

    /// Read a whole file. Files too large for one packet are refused
    /// before any of their contents are read.
    pub async fn read(&self, name: &Filename) -> io::Result<Bytes> {
        let path = self.path(name);
        let size = tokio::fs::metadata(&path).await?.len();
        if size > u64::from(u32::MAX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file of {size} bytes does not fit in one packet"),
            ));
        }
        tokio::fs::read(&path).await.map(Bytes::from)
    }

    pub async fn write(&self, name: &Filename, data: &[u8]) -> io::Result<()> {
        tokio::fs::write(self.path(name), data).await
    }

    pub async fn remove(&self, name: &Filename) -> io::Result<()> {
        let path = self.path(name);
        tokio::fs::metadata(&path).await?;
        tokio::fs::remove_file(&path).await
    }
}

/// LS: list the store directory.
pub async fn reply_ls(store: &FileStore, _request: Request) -> Reply {
    match store.list().await {
        Ok(listing) => {
            let bytes = listing.output.len();
            info!(
                command = %store.listing_command,
                status = %listing.status,
                bytes,
                "listing complete"
            );
            Reply::with_payload(Command::LsOut, listing.output).unwrap_or_else(|| {
                warn!(bytes, "listing too large for one packet");
                Reply::nak()
            })
        }
        Err(e) => {
            warn!(command = %store.listing_command, error = %e, "listing failed");
            let code = e.raw_os_error().unwrap_or(0) as u32;
            Reply::nak_with_code(code)
        }
    }
}

/// GET: send a file's contents.
pub async fn reply_get(store: &FileStore, request: Request) -> Reply {
    let name = &request.header.filename;
    match store.read(name).await {
        Ok(data) => {
            let bytes = data.len();
            match Reply::with_payload(Command::File, data) {
                Some(reply) => {
                    debug!(file = %name, bytes, "sending file");
                    reply
                }
                None => {
                    warn!(file = %name, bytes, "file too large for one packet");
                    Reply::nak()
                }
            }
        }
        Err(e) => {
            warn!(file = %name, error = %e, "get failed");
            Reply::nak()
        }
    }
}

/// PUT: store the uploaded payload.
pub async fn reply_put(store: &FileStore, request: Request) -> Reply {
    let name = &request.header.filename;
    match store.write(name, &request.payload).await {
        Ok(()) => {
            debug!(file = %name, bytes = request.payload.len(), "stored file");
            Reply::ack()
        }
        Err(e) => {
            warn!(file = %name, error = %e, "put failed");
            Reply::nak()
        }
    }
}

/// RM: remove a file.
pub async fn reply_rm(store: &FileStore, request: Request) -> Reply {
    let name = &request.header.filename;
    match store.remove(name).await {
        Ok(()) => {
            info!(file = %name, "removed file");
            Reply::ack()
        }
        Err(e) => {
            warn!(file = %name, error = %e, "rm failed");
            Reply::nak()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(command: Command, name: &str, payload: &[u8]) -> Request {
        let header = Header::request(command, Filename::new(name).unwrap())
            .with_payload_length(payload.len() as u32);
        Request::new(header, Bytes::copy_from_slice(payload))
    }

    fn store(dir: &TempDir) -> FileStore {
        FileStore::new(dir.path(), "ls -l 2>&1")
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let reply = reply_put(&store, request(Command::Put, "a.bin", b"\x00\x01\x02")).await;
        assert_eq!(reply, Reply::ack());

        let reply = reply_get(&store, request(Command::Get, "a.bin", b"")).await;
        assert_eq!(reply.header.command, Command::File);
        assert_eq!(reply.header.payload_length, 3);
        assert_eq!(&reply.payload[..], b"\x00\x01\x02");
        assert!(reply.header.filename.is_empty());
    }

    #[tokio::test]
    async fn test_get_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let raw: &[u8] = b"caf\xe9.txt";
        std::fs::write(dir.path().join(OsStr::from_bytes(raw)), b"latin-1").unwrap();

        let header = Header::request(Command::Get, Filename::from_bytes(raw).unwrap());
        let reply = reply_get(&store(&dir), Request::new(header, Bytes::new())).await;
        assert_eq!(reply.header.command, Command::File);
        assert_eq!(&reply.payload[..], b"latin-1");
    }

    #[tokio::test]
    async fn test_get_oversized_file_is_nak() {
        let dir = TempDir::new().unwrap();
        // Sparse: no data blocks are written.
        let file = std::fs::File::create(dir.path().join("huge.img")).unwrap();
        file.set_len(u64::from(u32::MAX) + 6).unwrap();

        let reply = reply_get(&store(&dir), request(Command::Get, "huge.img", b"")).await;
        assert_eq!(reply, Reply::nak());
    }

    #[test]
    fn test_payload_length_bounds() {
        assert_eq!(payload_length(0), Some(0));
        assert_eq!(payload_length(u32::MAX as usize), Some(u32::MAX));
        #[cfg(target_pointer_width = "64")]
        assert_eq!(payload_length(u32::MAX as usize + 6), None);
    }

    #[tokio::test]
    async fn test_get_missing_is_nak() {
        let dir = TempDir::new().unwrap();
        let reply = reply_get(&store(&dir), request(Command::Get, "nope.txt", b"")).await;
        assert_eq!(reply, Reply::nak());
    }

    #[tokio::test]
    async fn test_put_into_missing_directory_is_nak() {
        let dir = TempDir::new().unwrap();
        let reply = reply_put(&store(&dir), request(Command::Put, "no/such/dir", b"x")).await;
        assert_eq!(reply, Reply::nak());
    }

    #[tokio::test]
    async fn test_rm() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(dir.path().join("gone.txt"), b"bye").unwrap();

        let reply = reply_rm(&store, request(Command::Rm, "gone.txt", b"")).await;
        assert_eq!(reply, Reply::ack());
        assert!(!dir.path().join("gone.txt").exists());

        let reply = reply_rm(&store, request(Command::Rm, "gone.txt", b"")).await;
        assert_eq!(reply, Reply::nak());
    }

    #[tokio::test]
    async fn test_ls_lists_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("visible.txt"), b"hi").unwrap();

        let reply = reply_ls(&store(&dir), request(Command::Ls, "", b"")).await;
        assert_eq!(reply.header.command, Command::LsOut);
        assert_eq!(reply.header.payload_length as usize, reply.payload.len());
        let text = String::from_utf8_lossy(&reply.payload);
        assert!(text.contains("visible.txt"));
    }

    #[tokio::test]
    async fn test_ls_capability_failure_is_nak() {
        let dir = TempDir::new().unwrap();
        let missing_root = dir.path().join("missing");
        let store = FileStore::new(missing_root, "ls -l");

        let reply = reply_ls(&store, request(Command::Ls, "", b"")).await;
        assert_eq!(reply.header.command, Command::Nak);
        assert!(reply.payload.is_empty());
        assert_ne!(reply.header.payload_length, 0);
    }
}
