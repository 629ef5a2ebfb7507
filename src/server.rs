//! TCP server for cix connections.
//!
//! A single accept loop hands each connection to its own worker task. The
//! worker runs one request/response exchange per iteration until the client
//! goes away.

use crate::config::Config;
use crate::dispatch::DispatchTable;
use crate::error::{ServerError, TransportError};
use crate::handlers::{FileStore, Request};
use crate::header::Command;
use crate::supervisor::{ExitReason, Supervisor, WorkerExit};
use crate::transport::{recv_exact, recv_header, send_packet};
use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    context: Arc<Context>,
    supervisor: Supervisor,
}

/// Read-only state shared by every worker.
#[derive(Debug)]
pub struct Context {
    pub store: FileStore,
    pub dispatch: DispatchTable,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to the process.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let listener = create_listener(addr).map_err(|source| ServerError::Bind { addr, source })?;

        let context = Arc::new(Context {
            store: FileStore::new(&config.root, &config.listing_command),
            dispatch: DispatchTable::standard(),
        });

        info!(
            address = %listener.local_addr().map_err(|source| ServerError::Bind { addr, source })?,
            root = %config.root.display(),
            max_workers = config.max_workers,
            "Server listening"
        );

        Ok(Server {
            listener,
            context,
            supervisor: Supervisor::new(config.max_workers),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until accepting fails with a non-retryable error.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = tokio::select! {
                accepted = accept(&self.listener) => accepted.map_err(|e| {
                    error!(error = %e, "Failed to accept connection");
                    ServerError::Accept(e)
                })?,
                reaped = self.supervisor.wait_for_exit() => {
                    trace!(reaped, live = self.supervisor.live(), "reaped on notification");
                    continue;
                }
            };

            debug!(peer = %peer, "accepted connection");

            let context = Arc::clone(&self.context);
            if let Err(e) = self
                .supervisor
                .spawn(peer, handle_connection(stream, context))
            {
                warn!(peer = %peer, error = %e, "dropping connection");
            }

            let reaped = self.supervisor.reap();
            if reaped > 0 {
                trace!(reaped, live = self.supervisor.live(), "reaped after spawn");
            }
        }
    }
}

/// Accept one connection, retrying calls interrupted by a signal.
async fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                debug!("accept interrupted, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Serve one connection until the client disconnects or the stream fails.
///
/// The stream is dropped, and so closed, when this returns.
pub async fn handle_connection<S>(mut stream: S, context: Arc<Context>) -> WorkerExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut exit = WorkerExit {
        reason: ExitReason::Disconnected,
        requests: 0,
        bytes_in: 0,
        bytes_out: 0,
    };

    loop {
        match serve_one(&mut stream, &context, &mut exit).await {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                trace!("Connection closed by client");
                break;
            }
            Err(e) => {
                debug!(error = %e, "Connection error");
                exit.reason = ExitReason::TransportError;
                break;
            }
        }
    }

    exit
}

/// Read one request and send its reply.
async fn serve_one<S>(
    stream: &mut S,
    context: &Context,
    exit: &mut WorkerExit,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = recv_header(stream).await?;
    exit.requests += 1;
    exit.bytes_in += crate::header::HEADER_SIZE as u64;
    debug!(%header, "received header");

    // The upload follows the header whatever happens to it next.
    let payload = if header.command == Command::Put {
        let payload = recv_exact(stream, header.payload_length as usize).await?;
        exit.bytes_in += payload.len() as u64;
        payload
    } else {
        Bytes::new()
    };

    let Some(handler) = context.dispatch.lookup(header.command) else {
        warn!(%header, "invalid header from client");
        return Ok(());
    };

    let reply = handler(&context.store, Request::new(header, payload)).await;
    debug!(header = %reply.header, "sending header");
    send_packet(stream, &reply.header, &reply.payload).await?;
    exit.bytes_out += (crate::header::HEADER_SIZE + reply.payload.len()) as u64;
    Ok(())
}
