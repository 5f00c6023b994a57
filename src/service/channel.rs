//! Channel listener session.
//!
//! A connection starts unauthenticated; the only opcode accepted before
//! migrate-in is `PLAYER_LOGGEDIN`. Migrate-in consumes the handoff record,
//! re-validates the account and character, resolves the field and registers
//! the character. Every registration made by the session is undone in
//! [`ChannelService::leave`] before the socket is shut down.

use std::borrow::Cow;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::packet::{Packet, PacketReader};
use crate::data::{NpcProvider, NO_TARGET_MAP};
use crate::error::{MigrationError, Result, ServerError};
use crate::protocol::movement::{MovePath, Point};
use crate::protocol::opcode::{recv, OpcodeTable};
use crate::repository::{Account, Repositories};
use crate::script::{Conversations, DialogResponse, ScriptExecutor, WarpRequest};
use crate::service::channel_address;
use crate::service::migration::{MigrationManager, MigrationRequest};
use crate::service::packets::{self, DialogKind};
use crate::transport::{Connection, ConnectionHandle, SessionHandler};
use crate::utils::global_metrics;
use crate::utils::metrics::Timer;
use crate::world::character::Character;
use crate::world::field::Field;
use crate::world::manager::FieldManager;
use crate::world::transfer;

/// Longest chat line relayed to the field.
const MAX_CHAT_LEN: usize = 127;

pub struct ChannelService {
    config: Arc<ServerConfig>,
    world_id: u8,
    channel_id: u8,
    repos: Repositories,
    migrations: Arc<MigrationManager>,
    fields: Arc<FieldManager>,
    npcs: Arc<dyn NpcProvider>,
    scripts: Arc<dyn ScriptExecutor>,
}

struct ChannelSession {
    conn: ConnectionHandle,
    account: Option<Account>,
    character: Option<Arc<Character>>,
    field: Option<Arc<Field>>,
    conversations: Conversations,
    warps: mpsc::Sender<WarpRequest>,
}

impl ChannelService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        world_id: u8,
        channel_id: u8,
        repos: Repositories,
        migrations: Arc<MigrationManager>,
        fields: Arc<FieldManager>,
        npcs: Arc<dyn NpcProvider>,
        scripts: Arc<dyn ScriptExecutor>,
    ) -> Self {
        Self {
            config,
            world_id,
            channel_id,
            repos,
            migrations,
            fields,
            npcs,
            scripts,
        }
    }

    pub fn world_id(&self) -> u8 {
        self.world_id
    }

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    #[instrument(
        skip_all,
        fields(role = "channel", world = self.world_id, channel = self.channel_id, peer = %conn.peer())
    )]
    async fn session(self: Arc<Self>, mut conn: Connection) {
        let inbound = self.inbound();
        let (warps, mut warp_rx) = mpsc::channel(4);
        let mut session = ChannelSession {
            conn: conn.handle().clone(),
            account: None,
            character: None,
            field: None,
            conversations: Conversations::new(self.scripts.clone(), self.config.timeouts.dialog),
            warps,
        };
        let period = self.config.timeouts.keepalive;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            let result: std::result::Result<(), (Cow<'static, str>, ServerError)> = tokio::select! {
                packet = conn.next_packet() => match packet {
                    Ok(Some(packet)) => {
                        let opcode = packet.opcode().unwrap_or_default();
                        self.handle(&mut session, opcode, &packet)
                            .await
                            .map_err(|e| (inbound.name(opcode), e))
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Read loop ended");
                        break;
                    }
                },
                Some(warp) = warp_rx.recv() => self
                    .change_field(&mut session, warp.map_id, warp.portal.as_deref())
                    .await
                    .map_err(|e| (Cow::Borrowed("SCRIPT_WARP"), e)),
                _ = keepalive.tick() => {
                    session.conn.send(packets::ping());
                    Ok(())
                }
            };

            if let Err((opcode, e)) = result {
                // Security-relevant failures were already logged where they occurred.
                if !e.is_security_relevant() {
                    warn!(opcode = %opcode, error = %e, "Channel request failed");
                }
                if e.is_fatal_to_connection() {
                    break;
                }
            }
        }

        self.leave(&mut session).await;
        conn.shutdown().await;
    }

    async fn handle(&self, s: &mut ChannelSession, opcode: u16, packet: &Packet) -> Result<()> {
        let mut r = packet.reader();
        match opcode {
            recv::PLAYER_LOGGEDIN => return self.migrate_in(s, &mut r).await,
            recv::PONG => return Ok(()),
            _ => {}
        }

        let (Some(character), Some(field)) = (s.character.clone(), s.field.clone()) else {
            return Err(ServerError::Custom(format!(
                "opcode {opcode:#06x} before migrate-in"
            )));
        };

        match opcode {
            recv::MOVE_PLAYER => self.move_player(&character, &field, &mut r),
            recv::GENERAL_CHAT => self.chat(s, &character, &field, &mut r),
            recv::CHANGE_MAP => self.change_map(s, &character, &field, &mut r).await,
            recv::CHANGE_CHANNEL => self.change_channel(s, &character, &mut r).await,
            recv::NPC_TALK => self.npc_talk(s, &character, &field, &mut r),
            recv::NPC_TALK_MORE => self.npc_talk_more(s, &mut r),
            recv::MOVE_LIFE => self.move_life(&character, &field, &mut r),
            recv::CLOSE_RANGE_ATTACK => self.close_range_attack(&character, &field, &mut r),
            _ => {
                debug!(opcode, "Unhandled channel opcode");
                Ok(())
            }
        }
    }

    async fn migrate_in(&self, s: &mut ChannelSession, r: &mut PacketReader<'_>) -> Result<()> {
        let character_id = r.i32()?;
        if s.character.is_some() {
            return Err(ServerError::Custom(format!(
                "repeated migrate-in for character {character_id}"
            )));
        }
        match self.admit(s, character_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                global_metrics().migration_rejected();
                warn!(security = true, character_id, error = %e, "Migrate-in rejected");
                // An unauthenticated session never outlives a failed migrate-in.
                if e.is_fatal_to_connection() {
                    Err(e)
                } else {
                    Err(ServerError::Custom(format!("migrate-in failed: {e}")))
                }
            }
        }
    }

    async fn admit(&self, s: &mut ChannelSession, character_id: i32) -> Result<()> {
        let _timer = Timer::start("migrate_in");
        let record = self
            .migrations
            .consume(character_id)
            .ok_or(MigrationError::NotFound(character_id))?;

        if record.target_world != self.world_id || record.target_channel != self.channel_id {
            return Err(MigrationError::WrongTarget {
                character_id,
                world: record.target_world,
                channel: record.target_channel,
            }
            .into());
        }

        let account = self
            .repos
            .accounts
            .find_by_id(record.account_id)
            .await?
            .ok_or(MigrationError::AccountMissing(record.account_id))?;
        if account.banned || record.account.banned {
            return Err(MigrationError::Banned(account.id).into());
        }

        let stored = self
            .repos
            .characters
            .find_by_id(character_id)
            .await?
            .ok_or(MigrationError::CharacterMissing(character_id))?;
        if stored.account_id != account.id || stored.world_id != self.world_id {
            return Err(MigrationError::OwnershipMismatch {
                character_id,
                account_id: account.id,
            }
            .into());
        }

        let items = match self.repos.items.find_by_character_id(character_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(character_id, error = %e, "Item load failed, continuing with empty inventory");
                Vec::new()
            }
        };

        let field = self
            .fields
            .get_or_fallback(stored.map_id, self.config.world.default_map)
            .await?;
        let portal = field
            .data()
            .portal_by_id(stored.spawn_point)
            .map(|p| p.name.clone());

        let character = Character::new(stored, items, Point::default(), s.conn.clone());
        let conn = s.conn.clone();
        let channel_id = self.channel_id;
        let arrival = transfer::enter(&character, &field, portal.as_deref(), |_| {
            conn.send(packets::set_field(&character, channel_id, true));
        });

        info!(
            character_id,
            account_id = account.id,
            map_id = field.map_id(),
            portal = arrival.portal_id,
            "Character entered channel"
        );
        s.account = Some(account);
        s.character = Some(character);
        s.field = Some(field);
        Ok(())
    }

    fn move_player(
        &self,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let field_key = r.u8()?;
        let path = MovePath::decode(r)?;
        if field_key != character.field_key() {
            debug!(character_id = character.id(), field_key, "Movement for a stale field ignored");
            return Ok(());
        }
        path.apply_to(&mut *character.state());
        field
            .characters()
            .broadcast_except(&packets::move_player(character.id(), &path), character.id());
        Ok(())
    }

    fn chat(
        &self,
        s: &ChannelSession,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let text = r.str()?;
        let show = r.u8()?;
        if text.is_empty() || text.len() > MAX_CHAT_LEN {
            return Ok(());
        }
        let gm = s.account.as_ref().is_some_and(|a| a.gm_level > 0);
        field
            .characters()
            .broadcast(&packets::chat_text(character.id(), gm, &text, show));
        Ok(())
    }

    async fn change_map(
        &self,
        s: &mut ChannelSession,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let _from_cash_shop = r.u8()?;
        let target = r.i32()?;
        let portal_name = r.str()?;

        let destination = if target == 0 && !character.is_alive() {
            {
                let mut state = character.state();
                state.record.hp = state.record.max_hp.clamp(1, 50);
            }
            Some((field.data().return_map, None))
        } else if target == -1 {
            field
                .data()
                .portal_by_name(&portal_name)
                .filter(|p| p.target_map != NO_TARGET_MAP)
                .map(|p| (p.target_map, Some(p.target_portal.clone())))
        } else {
            None
        };

        match destination {
            Some((map_id, portal)) => self.change_field(s, map_id, portal.as_deref()).await,
            None => {
                debug!(character_id = character.id(), target, portal = %portal_name, "Map change ignored");
                s.conn.send(packets::enable_actions());
                Ok(())
            }
        }
    }

    /// Move the session's character to `map_id`, used by portals, revival and
    /// script warps.
    async fn change_field(
        &self,
        s: &mut ChannelSession,
        map_id: i32,
        portal: Option<&str>,
    ) -> Result<()> {
        let (Some(character), Some(from)) = (s.character.clone(), s.field.clone()) else {
            return Ok(());
        };
        let to = self
            .fields
            .get_or_fallback(map_id, self.config.world.default_map)
            .await?;
        let conn = s.conn.clone();
        let channel_id = self.channel_id;
        transfer::transfer(&character, &from, &to, portal, |_| {
            conn.send(packets::set_field(&character, channel_id, false));
        });
        s.field = Some(to);
        Ok(())
    }

    async fn change_channel(
        &self,
        s: &mut ChannelSession,
        character: &Arc<Character>,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let target = r.u8()?;
        let Some(account) = s.account.clone() else {
            return Err(ServerError::ConnectionClosed);
        };
        if target == self.channel_id || self.config.channel(self.world_id, target).is_none() {
            debug!(character_id = character.id(), target, "Channel change refused");
            s.conn.send(packets::enable_actions());
            return Ok(());
        }
        let address = channel_address(&self.config, self.world_id, target)?;

        // The target loads the character from the repository, so it is saved
        // before the record can be consumed.
        let character_id = character.id();
        self.migrations.cancel(character_id);
        self.leave(s).await;
        self.migrations.create(MigrationRequest {
            character_id,
            account,
            target_world: self.world_id,
            target_channel: target,
            machine_id: String::new(),
            client_key: rand::random::<i64>(),
        });

        info!(character_id, from = self.channel_id, to = target, "Channel change");
        s.conn.send(packets::change_channel(address));
        s.conn.close();
        Ok(())
    }

    fn npc_talk(
        &self,
        s: &ChannelSession,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let object_id = r.i32()?;
        let Some(npc) = field.npcs().get(object_id) else {
            debug!(object_id, "Talk to unknown NPC");
            s.conn.send(packets::enable_actions());
            return Ok(());
        };
        let Some(script) = self.npcs.npc(npc.template_id()).and_then(|d| d.script.clone()) else {
            s.conn.send(packets::enable_actions());
            return Ok(());
        };

        let conn = s.conn.clone();
        s.conversations.start(
            character.clone(),
            npc.template_id(),
            &script,
            s.warps.clone(),
            move |_outcome| {
                conn.send(packets::enable_actions());
            },
        );
        Ok(())
    }

    fn npc_talk_more(&self, s: &ChannelSession, r: &mut PacketReader<'_>) -> Result<()> {
        let kind = r.u8()?;
        let action = r.i8()?;
        let response = match (DialogKind::from_u8(kind), action) {
            (_, -1) => None,
            (Some(DialogKind::Say), 0) => Some(DialogResponse::Prev),
            (Some(DialogKind::Say), 1) => Some(DialogResponse::Next),
            (Some(DialogKind::YesNo), 0) => Some(DialogResponse::No),
            (Some(DialogKind::YesNo), 1) => Some(DialogResponse::Yes),
            (Some(DialogKind::Menu), 1) => Some(DialogResponse::Selection(r.i32()?)),
            _ => None,
        };
        match response {
            Some(response) => {
                if !s.conversations.deliver(response) {
                    s.conn.send(packets::enable_actions());
                }
            }
            None => s.conversations.end(),
        }
        Ok(())
    }

    fn move_life(
        &self,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let object_id = r.i32()?;
        let move_id = r.i16()?;
        let use_skill = r.bool()?;
        let skill = r.u8()?;
        let path = MovePath::decode(r)?;

        let Some(mob) = field.mobs().get(object_id) else {
            return Ok(());
        };
        if mob.controller() != Some(character.id()) {
            debug!(object_id, character_id = character.id(), "Mob movement from a non-controller ignored");
            return Ok(());
        }
        path.apply_to(&mut *mob.state());
        let mp = mob.template().max_mp.clamp(0, i16::MAX as i32) as i16;
        character.send(packets::move_mob_response(object_id, move_id, use_skill, mp));
        field.characters().broadcast_except(
            &packets::move_mob(object_id, use_skill, skill, &path),
            character.id(),
        );
        Ok(())
    }

    fn close_range_attack(
        &self,
        character: &Arc<Character>,
        field: &Field,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let counts = r.u8()?;
        let targets = usize::from(counts >> 4);
        let hits = usize::from(counts & 0x0F);
        let skill_id = r.i32()?;

        let mut entries = Vec::with_capacity(targets);
        for _ in 0..targets {
            let object_id = r.i32()?;
            let mut damage = Vec::with_capacity(hits);
            for _ in 0..hits {
                damage.push(r.i32()?);
            }
            entries.push((object_id, damage));
        }

        field.characters().broadcast_except(
            &packets::close_range_attack(character.id(), skill_id, hits as u8, &entries),
            character.id(),
        );

        let mut gained: i64 = 0;
        for (object_id, damage) in &entries {
            let total = damage
                .iter()
                .filter(|d| **d > 0)
                .fold(0i32, |acc, d| acc.saturating_add(*d));
            let Some(outcome) = field.mobs().damage(*object_id, total) else {
                continue;
            };
            if outcome.killed() {
                if let Some(mob) = field.kill_mob(*object_id) {
                    gained += i64::from(mob.template().exp) * i64::from(self.config.rates.exp);
                    debug!(object_id, character_id = character.id(), "Mob killed");
                }
            }
        }

        if gained > 0 {
            let exp = {
                let mut state = character.state();
                let total = (i64::from(state.record.exp) + gained).min(i64::from(i32::MAX));
                state.record.exp = total as i32;
                state.record.exp
            };
            character.send(packets::stat_changed(packets::stat::EXP, exp));
        }
        Ok(())
    }

    /// Undo everything the session registered: end the conversation, leave
    /// the field and save the character. Safe to call more than once.
    async fn leave(&self, s: &mut ChannelSession) {
        s.conversations.end();
        let Some(character) = s.character.take() else {
            return;
        };
        if let Some(field) = s.field.take() {
            field.remove_character(character.id());
        }
        self.persist(&character).await;
        debug!(character_id = character.id(), "Character left channel");
    }

    async fn persist(&self, character: &Character) {
        let (record, items) = {
            let state = character.state();
            (state.record.clone(), state.items.clone())
        };
        let character_id = record.id;

        if let Err(e) = self.repos.characters.update(record).await {
            warn!(character_id, error = %e, "Character save failed");
        }

        match self.repos.items.find_by_character_id(character_id).await {
            Ok(stored) => {
                for old in stored.iter().filter(|o| !items.iter().any(|i| i.id == o.id)) {
                    if let Err(e) = self.repos.items.delete(old.id).await {
                        warn!(character_id, item = old.id, error = %e, "Item delete failed");
                    }
                }
            }
            Err(e) => warn!(character_id, error = %e, "Item lookup during save failed"),
        }
        for item in items {
            let result = if item.id == 0 {
                self.repos.items.create(item).await.map(|_| ())
            } else {
                self.repos.items.update(item).await
            };
            if let Err(e) = result {
                warn!(character_id, error = %e, "Item save failed");
            }
        }
    }
}

impl SessionHandler for ChannelService {
    fn role(&self) -> &'static str {
        "channel"
    }

    fn inbound(&self) -> OpcodeTable {
        OpcodeTable::channel_inbound()
    }

    fn run(self: Arc<Self>, conn: Connection) -> BoxFuture<'static, ()> {
        self.session(conn).boxed()
    }
}
