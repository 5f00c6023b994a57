//! # Transport Layer
//!
//! TCP listeners, per-connection session transport and a matching client.
//!
//! ## Connection Lifecycle
//! 1. Accept, send the unencrypted handshake carrying both IVs
//! 2. Split the socket: the session task reads, a writer task writes
//! 3. Read deadline of 5 minutes, write deadline of 30 seconds
//! 4. Close is idempotent; the session deregisters before the socket goes away

pub mod client;
pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionHandle, TransportSettings};
pub use listener::SessionHandler;
