//! # Error Types
//!
//! Error handling for the login and channel servers.
//!
//! This module defines every error variant that can surface while a session is
//! running, from low-level I/O failures to migration integrity violations.
//!
//! ## Error Categories
//! - **Protocol violations**: version mismatch, invalid length, truncated reads.
//!   Fatal to the connection, never to the process.
//! - **Cipher misuse**: keystream used before the key schedule exists.
//! - **Migration integrity**: missing, expired, mismatched or banned handoffs.
//! - **Field resolution**: unknown or unloadable maps.
//! - **Script faults**: caught per conversation and treated as "ended".
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use legacy_gameserver::error::{Result, ServerError};
//! use tracing::error;
//!
//! fn check_length(len: usize) -> Result<usize> {
//!     if len == 0 {
//!         return Err(ServerError::InvalidLength(len));
//!     }
//!     Ok(len)
//! }
//!
//! if let Err(e) = check_length(0) {
//!     error!(error = %e, "Dropping connection");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection errors
    pub const ERR_WRITE_TIMEOUT: &str = "Write deadline exceeded";

    /// Handshake errors
    pub const ERR_HANDSHAKE_TRUNCATED: &str = "Handshake block truncated";

    /// Field errors
    pub const ERR_DEFAULT_MAP_UNAVAILABLE: &str = "Default map could not be loaded";

    /// Script errors
    pub const ERR_SCRIPT_NOT_FOUND: &str = "Script not found";
    pub const ERR_CONVERSATION_ENDED: &str = "Conversation ended";

    /// Repository errors
    pub const ERR_RECORD_NOT_FOUND: &str = "Record not found";
    pub const ERR_DUPLICATE_NAME: &str = "Name already in use";
}

/// Reasons a migration handoff is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("no valid migration record for character {0}")]
    NotFound(i32),

    #[error("migration for character {character_id} targets world {world}/channel {channel}")]
    WrongTarget {
        character_id: i32,
        world: u8,
        channel: u8,
    },

    #[error("account {0} is banned")]
    Banned(i32),

    #[error("account {0} no longer exists")]
    AccountMissing(i32),

    #[error("character {0} no longer exists")]
    CharacterMissing(i32),

    #[error("character {character_id} does not belong to account {account_id}")]
    OwnershipMismatch { character_id: i32, account_id: i32 },
}

// ServerError is the primary error type for all server operations
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Unsupported client version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u16, actual: u16 },

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),

    #[error("Packet truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Cipher used before key schedule initialization")]
    CipherNotInitialized,

    #[error("Migration rejected: {0}")]
    Migration(#[from] MigrationError),

    #[error("Field {0} unavailable")]
    FieldUnavailable(i32),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ServerError {
    /// Whether this error must tear down the connection that produced it.
    ///
    /// Script and repository failures degrade gracefully inside a session;
    /// everything else ends it.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self, ServerError::Script(_) | ServerError::Repository(_))
    }

    /// Whether the failure should be logged as a security event.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            ServerError::Migration(_) | ServerError::VersionMismatch { .. }
        )
    }
}

/// Type alias for Results using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;
