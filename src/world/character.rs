//! In-world player character.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::packet::Packet;
use crate::protocol::movement::{Movable, Point};
use crate::repository::{self, Item};
use crate::transport::ConnectionHandle;
use crate::world::registry::{Entity, Recipient};

/// Mutable part of a character, guarded by the character's own lock.
#[derive(Debug, Clone)]
pub struct CharacterState {
    /// Persistent record; `map_id` and `spawn_point` are kept current.
    pub record: repository::Character,
    pub items: Vec<Item>,
    pub position: Point,
    pub foothold: i16,
    pub stance: u8,
    /// Generation counter bumped on every field transfer.
    pub field_key: u8,
}

impl Movable for CharacterState {
    fn set_position(&mut self, pos: Point) {
        self.position = pos;
    }

    fn set_foothold(&mut self, foothold: i16) {
        self.foothold = foothold;
    }

    fn set_move_action(&mut self, action: u8) {
        self.stance = action;
    }
}

#[derive(Debug)]
pub struct Character {
    id: i32,
    account_id: i32,
    name: String,
    conn: ConnectionHandle,
    state: Mutex<CharacterState>,
}

impl Character {
    pub fn new(
        record: repository::Character,
        items: Vec<Item>,
        position: Point,
        conn: ConnectionHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: record.id,
            account_id: record.account_id,
            name: record.name.clone(),
            conn,
            state: Mutex::new(CharacterState {
                record,
                items,
                position,
                foothold: 0,
                stance: 0,
                field_key: 0,
            }),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn account_id(&self) -> i32 {
        self.account_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    /// Send directly to this character's client.
    pub fn send(&self, packet: Packet) -> bool {
        self.conn.send(packet)
    }

    pub fn state(&self) -> MutexGuard<'_, CharacterState> {
        self.state.lock()
    }

    pub fn map_id(&self) -> i32 {
        self.state.lock().record.map_id
    }

    pub fn field_key(&self) -> u8 {
        self.state.lock().field_key
    }

    pub fn position(&self) -> Point {
        self.state.lock().position
    }

    /// Copy of the persistent record for saving.
    pub fn record(&self) -> repository::Character {
        self.state.lock().record.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().record.hp > 0
    }
}

impl Entity for Character {
    type Key = i32;

    fn key(&self) -> i32 {
        self.id
    }
}

impl Recipient for Character {
    fn deliver(&self, packet: Packet) -> bool {
        self.conn.send(packet)
    }
}
