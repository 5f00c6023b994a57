//! Opcode constants and the opcode→name tables used for diagnostics.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, ServerError};

/// Client → server opcodes.
pub mod recv {
    pub const LOGIN_PASSWORD: u16 = 0x01;
    pub const SERVERLIST_REREQUEST: u16 = 0x04;
    pub const CHARLIST_REQUEST: u16 = 0x05;
    pub const SERVERSTATUS_REQUEST: u16 = 0x06;
    pub const SERVERLIST_REQUEST: u16 = 0x0B;
    pub const CHAR_SELECT: u16 = 0x13;
    pub const PLAYER_LOGGEDIN: u16 = 0x14;
    pub const PONG: u16 = 0x18;
    pub const CHANGE_MAP: u16 = 0x26;
    pub const CHANGE_CHANNEL: u16 = 0x27;
    pub const MOVE_PLAYER: u16 = 0x29;
    pub const CLOSE_RANGE_ATTACK: u16 = 0x2C;
    pub const GENERAL_CHAT: u16 = 0x31;
    pub const NPC_TALK: u16 = 0x3A;
    pub const NPC_TALK_MORE: u16 = 0x3C;
    pub const MOVE_LIFE: u16 = 0xBC;
}

/// Server → client opcodes.
pub mod send {
    pub const LOGIN_STATUS: u16 = 0x00;
    pub const SERVERSTATUS: u16 = 0x03;
    pub const SERVERLIST: u16 = 0x0A;
    pub const CHARLIST: u16 = 0x0B;
    pub const SERVER_IP: u16 = 0x0C;
    pub const CHANGE_CHANNEL: u16 = 0x10;
    pub const PING: u16 = 0x11;
    pub const STAT_CHANGED: u16 = 0x1F;
    pub const SET_FIELD: u16 = 0x7D;
    pub const SPAWN_PLAYER: u16 = 0xA0;
    pub const REMOVE_PLAYER_FROM_MAP: u16 = 0xA1;
    pub const CHATTEXT: u16 = 0xA2;
    pub const MOVE_PLAYER: u16 = 0xB9;
    pub const CLOSE_RANGE_ATTACK: u16 = 0xBA;
    pub const SPAWN_MONSTER: u16 = 0xEC;
    pub const KILL_MONSTER: u16 = 0xED;
    pub const SPAWN_MONSTER_CONTROL: u16 = 0xEE;
    pub const MOVE_MONSTER: u16 = 0xEF;
    pub const MOVE_MONSTER_RESPONSE: u16 = 0xF0;
    pub const SPAWN_NPC: u16 = 0x101;
    pub const SPAWN_NPC_REQUEST_CONTROLLER: u16 = 0x103;
    pub const NPC_TALK: u16 = 0x130;
}

/// Opcode → name bindings, one table per direction per listener role.
#[derive(Clone)]
pub struct OpcodeTable {
    names: Arc<RwLock<HashMap<u16, Cow<'static, str>>>>,
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeTable {
    pub fn new() -> Self {
        Self {
            names: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn with_static(entries: &[(u16, &'static str)]) -> Self {
        let names = entries
            .iter()
            .map(|&(op, name)| (op, Cow::Borrowed(name)))
            .collect();
        Self {
            names: Arc::new(RwLock::new(names)),
        }
    }

    /// Inbound opcodes the login listener understands.
    pub fn login_inbound() -> Self {
        Self::with_static(&[
            (recv::LOGIN_PASSWORD, "LOGIN_PASSWORD"),
            (recv::SERVERLIST_REREQUEST, "SERVERLIST_REREQUEST"),
            (recv::CHARLIST_REQUEST, "CHARLIST_REQUEST"),
            (recv::SERVERSTATUS_REQUEST, "SERVERSTATUS_REQUEST"),
            (recv::SERVERLIST_REQUEST, "SERVERLIST_REQUEST"),
            (recv::CHAR_SELECT, "CHAR_SELECT"),
            (recv::PONG, "PONG"),
        ])
    }

    /// Inbound opcodes a channel listener understands.
    pub fn channel_inbound() -> Self {
        Self::with_static(&[
            (recv::PLAYER_LOGGEDIN, "PLAYER_LOGGEDIN"),
            (recv::PONG, "PONG"),
            (recv::CHANGE_MAP, "CHANGE_MAP"),
            (recv::CHANGE_CHANNEL, "CHANGE_CHANNEL"),
            (recv::MOVE_PLAYER, "MOVE_PLAYER"),
            (recv::CLOSE_RANGE_ATTACK, "CLOSE_RANGE_ATTACK"),
            (recv::GENERAL_CHAT, "GENERAL_CHAT"),
            (recv::NPC_TALK, "NPC_TALK"),
            (recv::NPC_TALK_MORE, "NPC_TALK_MORE"),
            (recv::MOVE_LIFE, "MOVE_LIFE"),
        ])
    }

    /// Every outbound opcode.
    pub fn outbound() -> Self {
        Self::with_static(&[
            (send::LOGIN_STATUS, "LOGIN_STATUS"),
            (send::SERVERSTATUS, "SERVERSTATUS"),
            (send::SERVERLIST, "SERVERLIST"),
            (send::CHARLIST, "CHARLIST"),
            (send::SERVER_IP, "SERVER_IP"),
            (send::CHANGE_CHANNEL, "CHANGE_CHANNEL"),
            (send::PING, "PING"),
            (send::STAT_CHANGED, "STAT_CHANGED"),
            (send::SET_FIELD, "SET_FIELD"),
            (send::SPAWN_PLAYER, "SPAWN_PLAYER"),
            (send::REMOVE_PLAYER_FROM_MAP, "REMOVE_PLAYER_FROM_MAP"),
            (send::CHATTEXT, "CHATTEXT"),
            (send::MOVE_PLAYER, "MOVE_PLAYER"),
            (send::CLOSE_RANGE_ATTACK, "CLOSE_RANGE_ATTACK"),
            (send::SPAWN_MONSTER, "SPAWN_MONSTER"),
            (send::KILL_MONSTER, "KILL_MONSTER"),
            (send::SPAWN_MONSTER_CONTROL, "SPAWN_MONSTER_CONTROL"),
            (send::MOVE_MONSTER, "MOVE_MONSTER"),
            (send::MOVE_MONSTER_RESPONSE, "MOVE_MONSTER_RESPONSE"),
            (send::SPAWN_NPC, "SPAWN_NPC"),
            (send::SPAWN_NPC_REQUEST_CONTROLLER, "SPAWN_NPC_REQUEST_CONTROLLER"),
            (send::NPC_TALK, "NPC_TALK"),
        ])
    }

    /// Bind an extra name at runtime.
    pub fn register(&self, opcode: u16, name: &str) -> Result<()> {
        let mut names = self.names.write().map_err(|_| {
            ServerError::Custom("Failed to acquire write lock on opcode table".to_string())
        })?;
        names.insert(opcode, Cow::Owned(name.to_string()));
        Ok(())
    }

    /// Name for an opcode, or a hex rendering when unbound.
    pub fn name(&self, opcode: u16) -> Cow<'static, str> {
        self.names
            .read()
            .ok()
            .and_then(|names| names.get(&opcode).cloned())
            .unwrap_or_else(|| Cow::Owned(format!("UNKNOWN_{opcode:#06x}")))
    }

    pub fn contains(&self, opcode: u16) -> bool {
        self.names
            .read()
            .map(|names| names.contains_key(&opcode))
            .unwrap_or(false)
    }
}
