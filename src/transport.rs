//! Exact-length packet I/O over a byte stream.
//!
//! Streams may hand back fewer bytes than asked for, and a call may be
//! interrupted by a signal. Both are retried here; callers either get the
//! whole frame or an error, never a partial result.

use crate::error::TransportError;
use crate::header::{Header, HEADER_SIZE};
use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Upper bound on a single read. Buffers grow as data arrives instead of
/// trusting the declared length up front.
const READ_CHUNK: usize = 64 * 1024;

/// Write all of `buf`.
pub async fn send_exact<W>(conn: &mut W, buf: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < buf.len() {
        match conn.write(&buf[written..]).await {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                trace!(written, total = buf.len(), "write interrupted, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    loop {
        match conn.flush().await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read exactly `n` bytes.
///
/// End of stream before the first byte is [`TransportError::Closed`]; end of
/// stream later is [`TransportError::UnexpectedEof`].
pub async fn recv_exact<R>(conn: &mut R, n: usize) -> Result<Bytes, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(n.min(READ_CHUNK));

    while buffer.len() < n {
        let start = buffer.len();
        let chunk = (n - start).min(READ_CHUNK);
        buffer.resize(start + chunk, 0);

        match conn.read(&mut buffer[start..]).await {
            Ok(0) => {
                return Err(if start == 0 {
                    TransportError::Closed
                } else {
                    TransportError::UnexpectedEof {
                        expected: n,
                        received: start,
                    }
                });
            }
            Ok(read) => buffer.truncate(start + read),
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                buffer.truncate(start);
                trace!(received = start, expected = n, "read interrupted, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buffer.freeze())
}

pub async fn send_header<W>(conn: &mut W, header: &Header) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    send_exact(conn, &header.encode()).await
}

pub async fn recv_header<R>(conn: &mut R) -> Result<Header, TransportError>
where
    R: AsyncRead + Unpin,
{
    let block = recv_exact(conn, HEADER_SIZE).await?;
    Ok(Header::decode(&block)?)
}

/// Send a header followed by its payload.
///
/// `payload_length` is sent as set on the header. It matches `payload.len()`
/// for every packet except a NAK, where it carries an error code and no
/// payload follows.
pub async fn send_packet<W>(
    conn: &mut W,
    header: &Header,
    payload: &[u8],
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    send_header(conn, header).await?;
    if !payload.is_empty() {
        send_exact(conn, payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Command, Filename};
    use std::io;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_recv_exact_across_short_reads() {
        let mut mock = Builder::new()
            .read(b"he")
            .read(b"l")
            .read(b"lo world")
            .build();

        let data = recv_exact(&mut mock, 11).await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_recv_exact_retries_interrupted() {
        let mut mock = Builder::new()
            .read(b"ab")
            .read_error(io::Error::from(io::ErrorKind::Interrupted))
            .read(b"cd")
            .build();

        let data = recv_exact(&mut mock, 4).await.unwrap();
        assert_eq!(&data[..], b"abcd");
    }

    #[tokio::test]
    async fn test_recv_exact_premature_eof() {
        let mut mock = Builder::new().read(b"abc").build();

        match recv_exact(&mut mock, 8).await {
            Err(TransportError::UnexpectedEof { expected, received }) => {
                assert_eq!(expected, 8);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recv_exact_clean_close() {
        let mut mock = Builder::new().build();
        assert!(matches!(
            recv_exact(&mut mock, HEADER_SIZE).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_recv_exact_zero_bytes() {
        let mut mock = Builder::new().build();
        let data = recv_exact(&mut mock, 0).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_recv_exact_io_error() {
        let mut mock = Builder::new()
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        assert!(matches!(
            recv_exact(&mut mock, 4).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_send_exact_short_writes_and_interrupt() {
        let mut mock = Builder::new()
            .write(b"hel")
            .write_error(io::Error::from(io::ErrorKind::Interrupted))
            .write(b"lo")
            .build();

        send_exact(&mut mock, b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_exact_reset() {
        let mut mock = Builder::new()
            .write(b"he")
            .write_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();

        assert!(matches!(
            send_exact(&mut mock, b"hello").await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_header_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(16);
        let header = Header::request(Command::Put, Filename::new("notes.txt").unwrap())
            .with_payload_length(3);

        let sent = header.clone();
        let writer = tokio::spawn(async move {
            send_packet(&mut a, &sent, b"xyz").await.unwrap();
        });

        let received = recv_header(&mut b).await.unwrap();
        assert_eq!(received, header);
        let payload = recv_exact(&mut b, received.payload_length as usize)
            .await
            .unwrap();
        assert_eq!(&payload[..], b"xyz");

        writer.await.unwrap();
    }
}
