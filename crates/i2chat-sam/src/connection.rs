//! SAM control connection
//!
//! One TCP connection to the bridge plus its line reader. A connection is
//! opened, handshaken exactly once, then used for strictly sequential
//! request/reply exchanges. Stream operations each open their own.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::{self, Reply, SamVersion, VersionRange, LINE_TERMINATOR};
use crate::config::SamConfig;
use crate::error::{Result, SamError};

/// Longest reply line accepted from the bridge, terminator included
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Lifecycle of a control connection. Only `Ready` accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    HandshakeOk,
    Ready,
}

/// Closes a control connection from outside the task that owns it.
///
/// Closing wakes any pending read or write on the connection with
/// `SamError::ConnectionClosed`. There is no protocol-level abort in SAM,
/// so this is the only way to cancel a blocked STREAM ACCEPT.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Control connection to a SAM bridge
pub struct SamConnection {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    state: ConnectionState,
    version: Option<SamVersion>,
    closed: CancellationToken,
}

impl SamConnection {
    /// Dial the bridge without handshaking.
    pub async fn open(addr: &str, timeout: Duration) -> Result<Self> {
        Self::open_with(addr, timeout, &CloseHandle::new()).await
    }

    /// Dial the bridge, wiring `close` so it can cancel the connection
    /// before it is even established.
    pub async fn open_with(addr: &str, timeout: Duration, close: &CloseHandle) -> Result<Self> {
        let dial = tokio::time::timeout(timeout, TcpStream::connect(addr));
        let stream = tokio::select! {
            biased;
            _ = close.token.cancelled() => return Err(SamError::ConnectionClosed),
            dialed = dial => match dialed {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(dial_error(addr, timeout, e)),
                Err(_) => return Err(dial_error(addr, timeout, ErrorKind::TimedOut.into())),
            },
        };

        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        debug!("Connected to SAM bridge at {}", addr);

        Ok(SamConnection {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
            state: ConnectionState::Connected,
            version: None,
            closed: close.token.clone(),
        })
    }

    /// Dial and handshake using `config`.
    pub async fn connect(config: &SamConfig) -> Result<Self> {
        Self::connect_with(config, &CloseHandle::new()).await
    }

    pub async fn connect_with(config: &SamConfig, close: &CloseHandle) -> Result<Self> {
        let mut connection =
            Self::open_with(&config.bridge_addr, config.dial_timeout(), close).await?;
        connection.handshake(&config.versions).await?;
        Ok(connection)
    }

    /// Send HELLO and check for `HELLO REPLY RESULT=OK`.
    ///
    /// Allowed exactly once, straight after `open`.
    pub async fn handshake(&mut self, versions: &VersionRange) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(SamError::NotReady { state: self.state });
        }

        let line = self.exchange(&commands::hello(versions)).await?;
        let reply = match Reply::parse(&line) {
            Ok(reply) if reply.is("HELLO", "REPLY") && reply.is_ok() => reply,
            _ => {
                return Err(SamError::HandshakeRejected {
                    reply: line.trim_end().to_string(),
                })
            }
        };
        self.state = ConnectionState::HandshakeOk;

        self.version = reply.get("VERSION").and_then(|v| v.parse().ok());
        self.state = ConnectionState::Ready;

        info!(
            "SAM handshake with {} ok (version {})",
            self.addr,
            self.version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unspecified".to_string())
        );
        Ok(())
    }

    /// Write one command line and read exactly one reply line.
    pub async fn send_command(&mut self, line: &str) -> Result<String> {
        if self.closed.is_cancelled() {
            self.state = ConnectionState::Disconnected;
            return Err(SamError::ConnectionClosed);
        }
        if self.state != ConnectionState::Ready {
            return Err(SamError::NotReady { state: self.state });
        }
        self.exchange(line).await
    }

    /// `send_command` followed by `Reply::parse`
    pub async fn request(&mut self, line: &str) -> Result<Reply> {
        let reply = self.send_command(line).await?;
        Reply::parse(&reply)
    }

    /// Block until the bridge sends another line without writing anything.
    pub async fn read_line(&mut self) -> Result<String> {
        if self.state != ConnectionState::Ready {
            return Err(SamError::NotReady { state: self.state });
        }
        self.receive().await
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            token: self.closed.clone(),
        }
    }

    /// Release the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.closed.cancel();
        self.writer.shutdown().await.ok();
        self.state = ConnectionState::Disconnected;
        debug!("Closed SAM control connection to {}", self.addr);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `VERSION=` reported in `HELLO REPLY`, if the bridge sent one
    pub fn negotiated_version(&self) -> Option<SamVersion> {
        self.version
    }

    pub fn bridge_addr(&self) -> &str {
        &self.addr
    }

    /// Hand over the socket once the control exchange is finished. Bytes
    /// already buffered past the last reply line stay in the reader.
    pub(crate) fn into_parts(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }

    async fn exchange(&mut self, line: &str) -> Result<String> {
        self.transmit(line).await?;
        self.receive().await
    }

    async fn transmit(&mut self, line: &str) -> Result<()> {
        debug!("SAM >> {}", redact(line.trim_end()));

        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        let result = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                self.state = ConnectionState::Disconnected;
                return Err(SamError::ConnectionClosed);
            }
            result = write => result,
        };

        result.map_err(|e| {
            if is_disconnect(&e) {
                SamError::ConnectionClosed
            } else {
                SamError::WriteError(e)
            }
        })
    }

    async fn receive(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let mut limited = (&mut self.reader).take(MAX_LINE_LEN as u64);
        let read = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                self.state = ConnectionState::Disconnected;
                return Err(SamError::ConnectionClosed);
            }
            read = limited.read_until(LINE_TERMINATOR, &mut buf) => read,
        };

        match read {
            Ok(_) if buf.last() == Some(&LINE_TERMINATOR) => {}
            Ok(_) if buf.len() >= MAX_LINE_LEN => {
                self.state = ConnectionState::Disconnected;
                return Err(SamError::MalformedReply(format!(
                    "reply line exceeds {} bytes",
                    MAX_LINE_LEN
                )));
            }
            Ok(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(SamError::ConnectionClosed);
            }
            Err(e) if is_disconnect(&e) => {
                self.state = ConnectionState::Disconnected;
                return Err(SamError::ConnectionClosed);
            }
            Err(e) => return Err(SamError::ReadError(e)),
        }

        let line = String::from_utf8(buf)
            .map_err(|e| SamError::MalformedReply(format!("reply is not valid UTF-8: {}", e)))?;
        debug!("SAM << {}", redact(line.trim_end()));
        Ok(line)
    }
}

impl std::fmt::Debug for SamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamConnection")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("version", &self.version)
            .finish()
    }
}

// Both a `timeout` expiry and an OS-level `TimedOut` count as a dial
// timeout; anything else means nothing usable is listening.
fn dial_error(addr: &str, timeout: Duration, e: std::io::Error) -> SamError {
    if e.kind() == ErrorKind::TimedOut {
        SamError::DialTimeout {
            addr: addr.to_string(),
            timeout,
        }
    } else {
        SamError::ConnectionRefused {
            addr: addr.to_string(),
            source: e,
        }
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

/// Mask private key material before a line reaches the logs.
///
/// `SESSION CREATE` sends the private key as `DESTINATION=` and a
/// successful `SESSION STATUS` echoes it back.
pub(crate) fn redact(line: &str) -> Cow<'_, str> {
    let secret_destination =
        line.starts_with("SESSION CREATE") || line.starts_with("SESSION STATUS");
    if !secret_destination && !line.contains("PRIV=") {
        return Cow::Borrowed(line);
    }

    let masked: Vec<Cow<'_, str>> = line
        .split(' ')
        .map(|token| match token.split_once('=') {
            Some(("PRIV", _)) => Cow::Borrowed("PRIV=<redacted>"),
            Some(("DESTINATION", value)) if secret_destination && value != commands::TRANSIENT => {
                Cow::Borrowed("DESTINATION=<redacted>")
            }
            _ => Cow::Borrowed(token),
        })
        .collect();
    Cow::Owned(masked.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_session_create() {
        let line = "SESSION CREATE STYLE=STREAM ID=a DESTINATION=SECRET SIGNATURE_TYPE=7";
        let masked = redact(line);
        assert!(!masked.contains("SECRET"));
        assert!(masked.contains("DESTINATION=<redacted>"));
        assert!(masked.contains("ID=a"));
    }

    #[test]
    fn test_redact_keeps_transient_and_public_values() {
        let line = "SESSION CREATE STYLE=STREAM ID=a DESTINATION=TRANSIENT SIGNATURE_TYPE=7";
        assert_eq!(redact(line), line);

        let connect = "STREAM CONNECT ID=a DESTINATION=peer.i2p";
        assert_eq!(redact(connect), connect);
    }

    #[test]
    fn test_redact_dest_reply() {
        let masked = redact("DEST REPLY PUB=pubkey PRIV=privkey");
        assert_eq!(masked, "DEST REPLY PUB=pubkey PRIV=<redacted>");
    }

    #[test]
    fn test_redact_session_status_echo() {
        let masked = redact("SESSION STATUS RESULT=OK DESTINATION=SECRETPRIVKEY");
        assert!(!masked.contains("SECRETPRIVKEY"));
        assert_eq!(masked, "SESSION STATUS RESULT=OK DESTINATION=<redacted>");

        let transient = "SESSION STATUS RESULT=OK DESTINATION=TRANSIENT";
        assert_eq!(redact(transient), transient);
    }

    #[test]
    fn test_dial_error_timeouts() {
        let timeout = Duration::from_millis(250);
        let err = dial_error("127.0.0.1:7656", timeout, ErrorKind::TimedOut.into());
        match err {
            SamError::DialTimeout { addr, timeout: t } => {
                assert_eq!(addr, "127.0.0.1:7656");
                assert_eq!(t, timeout);
            }
            other => panic!("expected DialTimeout, got {:?}", other),
        }

        let err = dial_error("127.0.0.1:7656", timeout, ErrorKind::ConnectionRefused.into());
        assert!(matches!(err, SamError::ConnectionRefused { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_open_unroutable_times_out() {
        // TEST-NET-1 is never routed, so the dial can only time out, unless
        // the host has no route at all and rejects it straight away.
        let timeout = Duration::from_millis(200);
        let err = SamConnection::open("192.0.2.1:7656", timeout)
            .await
            .unwrap_err();
        match err {
            SamError::DialTimeout { timeout: t, .. } => assert_eq!(t, timeout),
            SamError::ConnectionRefused { source, .. } => {
                assert_ne!(source.kind(), ErrorKind::TimedOut)
            }
            other => panic!("expected a dial failure, got {:?}", other),
        }
    }

    #[test]
    fn test_close_handle_shared_token() {
        let handle = CloseHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_closed());
        handle.close();
        assert!(clone.is_closed());
    }

    #[tokio::test]
    async fn test_open_refused() {
        // Bind then drop to find a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = SamConnection::open(&addr, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SamError::ConnectionRefused { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_open_cancelled_before_dial() {
        let close = CloseHandle::new();
        close.close();
        let err = SamConnection::open_with("127.0.0.1:9", Duration::from_secs(3), &close)
            .await
            .unwrap_err();
        assert!(err.is_connection_closed());
    }
}
