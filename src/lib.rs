//! # Legacy Game Server
//!
//! Login and channel server core for a fixed legacy MMO client build.
//!
//! ## Layers
//! - [`cipher`]: process-wide key schedule and the per-packet cipher pipeline
//! - [`core`]: packet buffers, obfuscated header and tokio codecs
//! - [`protocol`]: opcodes, handshake and the movement-path codec
//! - [`transport`]: accept loop, split-socket connections and a test client
//! - [`service`]: login and channel session handlers, migration table,
//!   outbound packet builders
//! - [`world`]: fields, entity registries and the field manager
//! - [`script`]: NPC dialog execution
//! - [`repository`], [`data`]: persistence and static content behind traits
//!
//! ## Startup Order
//! ```rust,no_run
//! use legacy_gameserver::cipher::KeySchedule;
//! use legacy_gameserver::config::ServerConfig;
//! use legacy_gameserver::utils::logging;
//!
//! # fn main() -> legacy_gameserver::error::Result<()> {
//! let config = ServerConfig::from_env()?;
//! config.validate_strict()?;
//! logging::init(&config.logging)?;
//! let schedule = KeySchedule::init();
//! # let _ = schedule;
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod protocol;
pub mod repository;
pub mod script;
pub mod service;
pub mod transport;
pub mod utils;
pub mod world;

pub use error::{Result, ServerError};
