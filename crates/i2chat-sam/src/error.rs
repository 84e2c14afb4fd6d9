//! SAM client error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors surfaced by every SAM operation.
///
/// None of these are retried internally; each operation makes exactly one
/// attempt and leaves retry policy to the caller.
#[derive(Error, Debug)]
pub enum SamError {
    #[error("Timed out after {timeout:?} dialing SAM bridge at {addr}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("SAM bridge at {addr} refused the connection: {source}")]
    ConnectionRefused {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HELLO rejected by SAM bridge: {reply}")]
    HandshakeRejected { reply: String },

    #[error("DEST GENERATE failed: {reply}")]
    KeyGenerationFailed { reply: String },

    #[error("Failed to extract keys from DEST REPLY: {reply}")]
    KeyExtractionFailed { reply: String },

    #[error("SESSION CREATE failed: {reply}")]
    SessionCreateFailed { reply: String },

    #[error("STREAM ACCEPT failed: {reason}")]
    AcceptFailed { reason: String },

    #[error("STREAM CONNECT failed: {reply}")]
    ConnectFailed { reply: String },

    #[error("Identity store error at {}: {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Write to SAM bridge failed: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("Read from SAM bridge failed: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("Control connection closed")]
    ConnectionClosed,

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Control connection not ready (state: {state:?})")]
    NotReady { state: ConnectionState },

    #[error("Stream task failed: {0}")]
    TaskFailed(String),
}

impl SamError {
    /// True for failures caused by the control connection going away,
    /// whether closed locally through a `CloseHandle` or by the bridge.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, SamError::ConnectionClosed)
    }

    /// The raw bridge reply carried by protocol-level failures.
    pub fn reply(&self) -> Option<&str> {
        match self {
            SamError::HandshakeRejected { reply }
            | SamError::KeyGenerationFailed { reply }
            | SamError::KeyExtractionFailed { reply }
            | SamError::SessionCreateFailed { reply }
            | SamError::ConnectFailed { reply } => Some(reply),
            _ => None,
        }
    }
}

/// Result type for SAM operations
pub type Result<T> = std::result::Result<T, SamError>;
