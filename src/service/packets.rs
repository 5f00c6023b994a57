//! Outbound packet builders.
//!
//! Each function returns a finished [`Packet`]; fanning one out to a field
//! only clones the underlying `Bytes`.

use std::net::SocketAddrV4;

use crate::core::packet::{u8_count, Packet, PacketWriter};
use crate::protocol::movement::MovePath;
use crate::protocol::opcode::send;
use crate::repository::{Account, Character as CharacterRecord};
use crate::world::character::Character;
use crate::world::mob::Mob;
use crate::world::npc::Npc;

/// Login result codes.
pub mod login_result {
    pub const SUCCESS: u8 = 0;
    pub const BANNED: u8 = 3;
    pub const WRONG_PASSWORD: u8 = 4;
    pub const NOT_REGISTERED: u8 = 5;
}

/// Stat mask bits used in `STAT_CHANGED`.
pub mod stat {
    pub const HP: i32 = 0x400;
    pub const EXP: i32 = 0x10000;
    pub const MESO: i32 = 0x40000;
}

/// Dialog message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DialogKind {
    Say = 0,
    YesNo = 1,
    Menu = 4,
}

impl DialogKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Say),
            1 => Some(Self::YesNo),
            4 => Some(Self::Menu),
            _ => None,
        }
    }
}

pub fn login_failed(code: u8) -> Packet {
    PacketWriter::new(send::LOGIN_STATUS)
        .u8(code)
        .u8(0)
        .i32(0)
        .build()
}

pub fn login_success(account: &Account) -> Packet {
    PacketWriter::new(send::LOGIN_STATUS)
        .u8(login_result::SUCCESS)
        .u8(0)
        .i32(0)
        .i32(account.id)
        .u8(account.gender)
        .bool(account.gm_level > 0)
        .str(&account.name)
        .build()
}

/// One world entry of the world list.
pub fn world_entry(world_id: u8, name: &str, event_message: &str, channels: &[(u8, i32)]) -> Packet {
    let count = u8_count(channels.len());
    let mut w = PacketWriter::new(send::SERVERLIST);
    w.u8(world_id)
        .str(name)
        .u8(0)
        .str(event_message)
        .u16(100)
        .u16(100)
        .u8(0)
        .u8(count);
    for &(channel_id, load) in channels.iter().take(usize::from(count)) {
        w.str(&format!("{name}-{}", channel_id + 1))
            .i32(load)
            .u8(world_id)
            .u8(channel_id)
            .u8(0);
    }
    w.u16(0);
    w.build()
}

pub fn world_list_end() -> Packet {
    PacketWriter::new(send::SERVERLIST).u8(0xFF).build()
}

pub fn server_status(status: u16) -> Packet {
    PacketWriter::new(send::SERVERSTATUS).u16(status).build()
}

fn write_stats(w: &mut PacketWriter, c: &CharacterRecord) {
    w.i32(c.id)
        .padded_str(&c.name, 13)
        .u8(c.gender)
        .u8(c.skin)
        .i32(c.face)
        .i32(c.hair)
        .u8(c.level)
        .i16(c.job)
        .i16(c.str)
        .i16(c.dex)
        .i16(c.int)
        .i16(c.luk)
        .i16(c.hp)
        .i16(c.max_hp)
        .i16(c.mp)
        .i16(c.max_mp)
        .i32(c.exp)
        .i32(c.meso)
        .i32(c.map_id)
        .u8(c.spawn_point);
}

pub fn char_list(characters: &[CharacterRecord], slots: i32) -> Packet {
    let mut w = PacketWriter::new(send::CHARLIST);
    let count = u8_count(characters.len());
    w.u8(0).u8(count);
    for c in characters.iter().take(usize::from(count)) {
        write_stats(&mut w, c);
    }
    w.i32(slots);
    w.build()
}

/// Redirect after character select.
pub fn server_ip(addr: SocketAddrV4, character_id: i32) -> Packet {
    PacketWriter::new(send::SERVER_IP)
        .u16(0)
        .bytes(&addr.ip().octets())
        .u16(addr.port())
        .i32(character_id)
        .u8(0)
        .i32(0)
        .build()
}

pub fn change_channel(addr: SocketAddrV4) -> Packet {
    PacketWriter::new(send::CHANGE_CHANNEL)
        .u8(1)
        .bytes(&addr.ip().octets())
        .u16(addr.port())
        .build()
}

pub fn ping() -> Packet {
    PacketWriter::new(send::PING).build()
}

/// Empty stat update that re-enables client input.
pub fn enable_actions() -> Packet {
    PacketWriter::new(send::STAT_CHANGED).u8(1).i32(0).build()
}

pub fn stat_changed(mask: i32, value: i32) -> Packet {
    PacketWriter::new(send::STAT_CHANGED)
        .u8(0)
        .i32(mask)
        .i32(value)
        .build()
}

/// Full character data on the first field of a session, a short warp otherwise.
pub fn set_field(character: &Character, channel_id: u8, initial: bool) -> Packet {
    let state = character.state();
    let mut w = PacketWriter::new(send::SET_FIELD);
    w.i32(channel_id as i32).u8(0).bool(initial);
    if initial {
        write_stats(&mut w, &state.record);
        let count = u8_count(state.items.len());
        w.u8(count);
        for item in state.items.iter().take(usize::from(count)) {
            w.i16(item.slot).i32(item.item_id).i16(item.quantity);
        }
    } else {
        w.i32(state.record.map_id)
            .u8(state.record.spawn_point)
            .i16(state.record.hp)
            .u8(0);
    }
    w.i64(0);
    w.build()
}

pub fn spawn_player(character: &Character) -> Packet {
    let state = character.state();
    PacketWriter::new(send::SPAWN_PLAYER)
        .i32(character.id())
        .u8(state.record.level)
        .str(character.name())
        .u8(state.record.gender)
        .u8(state.record.skin)
        .i32(state.record.face)
        .i32(state.record.hair)
        .i16(state.position.x)
        .i16(state.position.y)
        .u8(state.stance)
        .i16(state.foothold)
        .build()
}

pub fn remove_player(character_id: i32) -> Packet {
    PacketWriter::new(send::REMOVE_PLAYER_FROM_MAP)
        .i32(character_id)
        .build()
}

pub fn chat_text(character_id: i32, gm: bool, text: &str, show: u8) -> Packet {
    PacketWriter::new(send::CHATTEXT)
        .i32(character_id)
        .bool(gm)
        .str(text)
        .u8(show)
        .build()
}

pub fn move_player(character_id: i32, path: &MovePath) -> Packet {
    let mut w = PacketWriter::new(send::MOVE_PLAYER);
    w.i32(character_id).i32(0);
    path.encode(&mut w);
    w.build()
}

/// Close-range attack as seen by the rest of the field.
pub fn close_range_attack(
    character_id: i32,
    skill_id: i32,
    hits: u8,
    targets: &[(i32, Vec<i32>)],
) -> Packet {
    // Both counts share one byte, four bits each.
    let shown = targets.len().min(0x0F);
    let mut w = PacketWriter::new(send::CLOSE_RANGE_ATTACK);
    w.i32(character_id)
        .u8(((shown as u8) << 4) | (hits & 0x0F))
        .u8(0)
        .i32(skill_id);
    for (object_id, damage) in &targets[..shown] {
        w.i32(*object_id).u8(0x06);
        for d in damage {
            w.i32(*d);
        }
    }
    w.build()
}

fn write_mob_body(w: &mut PacketWriter, mob: &Mob) {
    let state = mob.state();
    w.i32(mob.template().id)
        .i16(state.position.x)
        .i16(state.position.y)
        .u8(state.stance)
        .i16(0)
        .i16(state.foothold);
}

pub fn spawn_mob(mob: &Mob, new_spawn: bool) -> Packet {
    let mut w = PacketWriter::new(send::SPAWN_MONSTER);
    w.i32(mob.object_id()).u8(5);
    write_mob_body(&mut w, mob);
    w.i8(if new_spawn { -2 } else { -1 });
    w.build()
}

pub fn control_mob(mob: &Mob, control: bool) -> Packet {
    let mut w = PacketWriter::new(send::SPAWN_MONSTER_CONTROL);
    w.bool(control).i32(mob.object_id());
    if control {
        w.u8(5);
        write_mob_body(&mut w, mob);
    }
    w.build()
}

pub fn kill_mob(object_id: i32, animation: u8) -> Packet {
    PacketWriter::new(send::KILL_MONSTER)
        .i32(object_id)
        .u8(animation)
        .build()
}

pub fn move_mob(object_id: i32, use_skill: bool, skill: u8, path: &MovePath) -> Packet {
    let mut w = PacketWriter::new(send::MOVE_MONSTER);
    w.i32(object_id).u8(0).bool(use_skill).u8(skill).u8(0).u16(0);
    path.encode(&mut w);
    w.build()
}

pub fn move_mob_response(object_id: i32, move_id: i16, use_skill: bool, mp: i16) -> Packet {
    PacketWriter::new(send::MOVE_MONSTER_RESPONSE)
        .i32(object_id)
        .i16(move_id)
        .bool(use_skill)
        .i16(mp)
        .u8(0)
        .u8(0)
        .build()
}

fn write_npc_body(w: &mut PacketWriter, npc: &Npc) {
    let spawn = npc.spawn();
    w.i32(spawn.npc_id)
        .i16(spawn.x)
        .i16(spawn.y)
        .bool(!spawn.flip)
        .i16(spawn.foothold)
        .i16(spawn.rx0)
        .i16(spawn.rx1)
        .u8(1);
}

pub fn spawn_npc(npc: &Npc) -> Packet {
    let mut w = PacketWriter::new(send::SPAWN_NPC);
    w.i32(npc.object_id());
    write_npc_body(&mut w, npc);
    w.build()
}

pub fn npc_controller(npc: &Npc, control: bool) -> Packet {
    let mut w = PacketWriter::new(send::SPAWN_NPC_REQUEST_CONTROLLER);
    w.bool(control).i32(npc.object_id());
    if control {
        write_npc_body(&mut w, npc);
    }
    w.build()
}

/// Dialog box. `prev`/`next` only matter for [`DialogKind::Say`].
pub fn npc_talk(npc_id: i32, kind: DialogKind, text: &str, prev: bool, next: bool) -> Packet {
    let mut w = PacketWriter::new(send::NPC_TALK);
    w.u8(4).i32(npc_id).u8(kind as u8).u8(0).str(text);
    if kind == DialogKind::Say {
        w.bool(prev).bool(next);
    }
    w.build()
}
