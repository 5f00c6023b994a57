//! # Protocol Layer
//!
//! Everything that gives meaning to packet bodies once the codec has
//! deciphered them.
//!
//! ## Components
//! - **Opcodes**: inbound/outbound opcode constants and per-role name tables
//! - **Handshake**: the unencrypted hello block that seeds both IVs
//! - **Movement**: the tagged movement-path codec shared by players and mobs

pub mod handshake;
pub mod movement;
pub mod opcode;
