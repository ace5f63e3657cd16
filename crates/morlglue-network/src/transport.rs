//! Transport primitives
//!
//! Thin wrappers over tokio TCP sockets:
//! - `listen` binds with address reuse and a bounded backlog
//! - `accept` / `connect` turn off send coalescing on every stream
//! - `send_all` / `recv_all` loop until the full length moved or the
//!   transport failed, and report the count instead of an error

use std::net::SocketAddr;
use std::time::Duration;

use morlglue_common::{GlueError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, trace};

use crate::buffer::WireBuffer;
use crate::framing::{recv_framed, send_framed, FrameHeader};

/// Fresh stream socket for `addr`'s address family
pub fn open(addr: &SocketAddr) -> Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    Ok(socket)
}

/// Bind `host:port` and mark it passive.
///
/// Failure to bind is returned as [`GlueError::Bind`]; callers treat it as
/// a startup failure.
pub fn listen(host: &str, port: u16, backlog: u32) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| GlueError::Config(format!("invalid bind address {}:{}: {}", host, port, e)))?;

    let socket = open(&addr)?;
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .map_err(|source| GlueError::Bind { port, source })?;
    let listener = socket
        .listen(backlog)
        .map_err(|source| GlueError::Bind { port, source })?;

    debug!(%addr, backlog, "Listening");
    Ok(listener)
}

/// Wait for the next peer
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    Ok((stream, peer))
}

/// Single connection attempt
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Retry [`connect`] every `retry` until a server answers
pub async fn wait_for_connection(host: &str, port: u16, retry: Duration) -> TcpStream {
    loop {
        match connect(host, port).await {
            Ok(stream) => return stream,
            Err(e) => {
                debug!(host, port, error = %e, "Glue not reachable yet, retrying");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

/// Write all of `bytes`, returning how many were written.
///
/// A count below `bytes.len()` means the peer went away or the transport failed.
pub async fn send_all<W>(stream: &mut W, bytes: &[u8]) -> usize
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;
    while sent < bytes.len() {
        match stream.write(&bytes[sent..]).await {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!(error = %e, sent, "send_all stopped early");
                break;
            }
        }
    }
    if sent == bytes.len() {
        if let Err(e) = stream.flush().await {
            trace!(error = %e, "flush failed");
        }
    }
    sent
}

/// Fill `buf` completely, returning how many bytes were read.
///
/// A count below `buf.len()` means EOF or a transport failure; zero on an
/// idle stream means the peer closed.
pub async fn recv_all<R>(stream: &mut R, buf: &mut [u8]) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        match stream.read(&mut buf[received..]).await {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!(error = %e, received, "recv_all stopped early");
                break;
            }
        }
    }
    received
}

/// A connected stream with an optional per-operation deadline
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            io_timeout: None,
        }
    }

    /// Bound every send and receive by `timeout` (`None` blocks forever)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send `buffer` as one frame tagged `tag`
    pub async fn send_frame(&mut self, buffer: &WireBuffer, tag: u32) -> Result<usize> {
        match self.io_timeout {
            None => send_framed(&mut self.stream, buffer, tag).await,
            Some(limit) => tokio::time::timeout(limit, send_framed(&mut self.stream, buffer, tag))
                .await
                .map_err(|_| {
                    GlueError::Timeout(format!("sending tag {} to {} after {:?}", tag, self.peer, limit))
                })?,
        }
    }

    /// Receive one frame into `buffer`; `None` when the peer closed
    pub async fn recv_frame(&mut self, buffer: &mut WireBuffer) -> Result<Option<FrameHeader>> {
        match self.io_timeout {
            None => recv_framed(&mut self.stream, buffer).await,
            Some(limit) => tokio::time::timeout(limit, recv_framed(&mut self.stream, buffer))
                .await
                .map_err(|_| {
                    GlueError::Timeout(format!("receiving from {} after {:?}", self.peer, limit))
                })?,
        }
    }

    /// Shut the write side down and drop the stream
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(peer = %self.peer, error = %e, "shutdown failed");
        }
    }
}
