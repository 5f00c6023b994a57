//! Session handlers for the login and channel listeners, the migration
//! table that links them, and the outbound packet builders.

pub mod channel;
pub mod login;
pub mod migration;
pub mod packets;

use std::net::{SocketAddr, SocketAddrV4};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

pub use channel::ChannelService;
pub use login::LoginService;
pub use migration::{MigrationManager, MigrationRecord, MigrationRequest};

/// Advertised IPv4 address of a configured channel.
pub fn channel_address(config: &ServerConfig, world_id: u8, channel_id: u8) -> Result<SocketAddrV4> {
    let channel = config.channel(world_id, channel_id).ok_or_else(|| {
        ServerError::ConfigError(format!("No channel {channel_id} in world {world_id}"))
    })?;
    match channel.socket_addr()? {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(ServerError::ConfigError(format!(
            "Channel {world_id}/{channel_id} address {addr} is not IPv4"
        ))),
    }
}
