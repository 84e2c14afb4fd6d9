//! SAM v3 client for I2P streaming
//!
//! Speaks the line-oriented SAM control protocol to a local I2P router:
//! - HELLO version handshake on every control connection
//! - DEST GENERATE to mint a destination keypair, persisted as JSON
//! - SESSION CREATE (STREAM style) binding a persisted identity to a session id
//! - STREAM ACCEPT / STREAM CONNECT, each on its own control connection and
//!   optionally on its own task

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod session;
pub mod stream;

pub use commands::{Reply, SamVersion, SessionDestination, SignatureType, VersionRange};
pub use config::{SamConfig, DEFAULT_BRIDGE_ADDR};
pub use connection::{CloseHandle, ConnectionState, SamConnection, MAX_LINE_LEN};
pub use error::{Result, SamError};
pub use identity::{Identity, IdentityStore, DEFAULT_IDENTITY_PATH};
pub use session::{create_or_load_identity, create_session, generate_destination, Session};
pub use stream::{
    accept_stream, accept_stream_with, connect_to_stream, connect_to_stream_with, spawn_accept,
    spawn_connect, SamStream, StreamTask,
};
