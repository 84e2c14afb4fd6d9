//! STREAM ACCEPT / STREAM CONNECT
//!
//! Each operation dials its own control connection, handshakes, and names
//! the session by id. The session's own connection is never reused. Both
//! can be run on a separate task with `spawn_accept` / `spawn_connect`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::{self, Reply};
use crate::config::SamConfig;
use crate::connection::{CloseHandle, SamConnection};
use crate::error::{Result, SamError};

/// An established I2P stream.
///
/// After the status exchange the control socket carries the stream's
/// payload, so `SamStream` reads and writes it directly.
pub struct SamStream {
    status: Reply,
    remote_destination: Option<String>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SamStream {
    fn new(status: Reply, remote_destination: Option<String>, connection: SamConnection) -> Self {
        let (reader, writer) = connection.into_parts();
        SamStream {
            status,
            remote_destination,
            reader,
            writer,
        }
    }

    /// The `STREAM STATUS` reply that opened the stream
    pub fn status(&self) -> &Reply {
        &self.status
    }

    /// Peer destination: the accepted peer for ACCEPT, the dialled
    /// destination for CONNECT
    pub fn remote_destination(&self) -> Option<&str> {
        self.remote_destination.as_deref()
    }

    pub fn into_split(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for SamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamStream")
            .field("status", &self.status.raw())
            .field("remote_destination", &self.remote_destination)
            .finish()
    }
}

impl AsyncRead for SamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for SamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

/// Wait for an inbound stream on `session_id`.
///
/// Blocks until a peer connects; there is no bridge-side timeout.
pub async fn accept_stream(config: &SamConfig, session_id: &str) -> Result<SamStream> {
    accept_stream_with(config, session_id, &CloseHandle::new()).await
}

/// `accept_stream` that can be cancelled through `close`.
///
/// The bridge answers `STREAM STATUS RESULT=OK` once the accept is
/// registered, then writes a `<destination> FROM_PORT=.. TO_PORT=..` line
/// when a peer arrives. Any line carrying a `RESULT=` other than `OK` fails
/// the accept; a bridge that skips the status line and sends the peer line
/// straight away is accepted too.
pub async fn accept_stream_with(
    config: &SamConfig,
    session_id: &str,
    close: &CloseHandle,
) -> Result<SamStream> {
    let command = commands::accept_stream(session_id)?;
    let mut connection = SamConnection::connect_with(config, close).await?;

    let first = connection.request(&command).await.map_err(accept_error)?;
    if first.result().is_some_and(|result| result != "OK") {
        warn!("STREAM ACCEPT on {} rejected: {}", session_id, first);
        return Err(SamError::AcceptFailed {
            reason: first.raw().to_string(),
        });
    }

    if !first.is("STREAM", "STATUS") {
        debug!("Bridge sent peer line without STREAM STATUS: {}", first);
        let remote = first.verb().to_string();
        info!("Accepted inbound stream on session {}", session_id);
        return Ok(SamStream::new(first, Some(remote), connection));
    }

    info!("Waiting for inbound stream on session {}", session_id);
    let peer_line = connection.read_line().await.map_err(accept_error)?;
    let peer = Reply::parse(&peer_line)?;

    info!("Accepted inbound stream on session {}", session_id);
    Ok(SamStream::new(first, Some(peer.verb().to_string()), connection))
}

/// Open an outbound stream from `session_id` to `destination`.
pub async fn connect_to_stream(
    config: &SamConfig,
    session_id: &str,
    destination: &str,
) -> Result<SamStream> {
    connect_to_stream_with(config, session_id, destination, &CloseHandle::new()).await
}

pub async fn connect_to_stream_with(
    config: &SamConfig,
    session_id: &str,
    destination: &str,
    close: &CloseHandle,
) -> Result<SamStream> {
    let command = commands::connect_stream(session_id, destination)?;
    let mut connection = SamConnection::connect_with(config, close).await?;

    let reply = connection.request(&command).await?;
    if !reply.is_ok() {
        warn!("STREAM CONNECT on {} rejected: {}", session_id, reply);
        return Err(SamError::ConnectFailed {
            reply: reply.raw().to_string(),
        });
    }

    info!("Connected stream on session {}", session_id);
    Ok(SamStream::new(reply, Some(destination.to_string()), connection))
}

// I/O failures during ACCEPT surface as AcceptFailed; a closed connection
// keeps its own variant so cancellation stays recognisable.
fn accept_error(e: SamError) -> SamError {
    match e {
        SamError::ReadError(source) | SamError::WriteError(source) => SamError::AcceptFailed {
            reason: source.to_string(),
        },
        other => other,
    }
}

/// A stream operation running on its own task.
///
/// The result is delivered once through `join`. Dropping the task without
/// joining closes its connection and aborts it.
#[derive(Debug)]
pub struct StreamTask<T> {
    close: CloseHandle,
    handle: Option<JoinHandle<Result<T>>>,
}

impl<T> StreamTask<T> {
    /// Handle that closes the task's control connection, failing the
    /// pending operation with `ConnectionClosed`
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    pub fn close(&self) {
        self.close.close();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the operation's result.
    pub async fn join(mut self) -> Result<T> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Err(SamError::TaskFailed("already joined".to_string())),
        };
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SamError::ConnectionClosed),
            Err(e) => Err(SamError::TaskFailed(e.to_string())),
        }
    }
}

impl<T> Drop for StreamTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.close.close();
            handle.abort();
        }
    }
}

/// Run `accept_stream` on a new task.
pub fn spawn_accept(config: SamConfig, session_id: String) -> StreamTask<SamStream> {
    let close = CloseHandle::new();
    let task_close = close.clone();
    let handle =
        tokio::spawn(async move { accept_stream_with(&config, &session_id, &task_close).await });
    StreamTask {
        close,
        handle: Some(handle),
    }
}

/// Run `connect_to_stream` on a new task.
pub fn spawn_connect(
    config: SamConfig,
    session_id: String,
    destination: String,
) -> StreamTask<SamStream> {
    let close = CloseHandle::new();
    let task_close = close.clone();
    let handle = tokio::spawn(async move {
        connect_to_stream_with(&config, &session_id, &destination, &task_close).await
    });
    StreamTask {
        close,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_error_mapping() {
        let io = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(
            accept_error(SamError::ReadError(io)),
            SamError::AcceptFailed { .. }
        ));
        assert!(accept_error(SamError::ConnectionClosed).is_connection_closed());
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_session_id() {
        let task = spawn_accept(SamConfig::default(), "bad id".to_string());
        assert!(matches!(
            task.join().await,
            Err(SamError::InvalidSessionId(_))
        ));
    }
}
