//! # World Simulation Core
//!
//! Fields, their entity registries and the process-wide field manager.
//!
//! ## Locking
//! - One lock per registry, one for each field's object-id counter, one per
//!   entity for its mutable state
//! - Broadcasts deliver outside the registry lock
//! - NPC and mob controllers are character ids, never references

pub mod character;
pub mod field;
pub mod manager;
pub mod mob;
pub mod npc;
pub mod registry;
pub mod transfer;

pub use character::Character;
pub use field::{Field, FieldSettings, TickHook};
pub use manager::FieldManager;
pub use registry::{Entity, EntityRegistry, Recipient};
