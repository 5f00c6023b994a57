//! Login listener session: credentials, world list, character list and the
//! handoff to a channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::packet::{Packet, PacketReader};
use crate::error::{MigrationError, Result, ServerError};
use crate::protocol::opcode::{recv, OpcodeTable};
use crate::repository::{Account, AccountRepository, CharacterRepository};
use crate::service::migration::{MigrationManager, MigrationRequest};
use crate::service::packets::{self, login_result};
use crate::service::channel_address;
use crate::transport::{Connection, ConnectionHandle, SessionHandler};
use crate::utils::global_metrics;

/// Character slots offered on the character list.
const CHARACTER_SLOTS: i32 = 3;

pub struct LoginService {
    config: Arc<ServerConfig>,
    accounts: Arc<dyn AccountRepository>,
    characters: Arc<dyn CharacterRepository>,
    migrations: Arc<MigrationManager>,
}

#[derive(Default)]
struct LoginSession {
    account: Option<Account>,
    /// World and channel picked on the character list.
    selected: Option<(u8, u8)>,
}

impl LoginService {
    pub fn new(
        config: Arc<ServerConfig>,
        accounts: Arc<dyn AccountRepository>,
        characters: Arc<dyn CharacterRepository>,
        migrations: Arc<MigrationManager>,
    ) -> Self {
        Self {
            config,
            accounts,
            characters,
            migrations,
        }
    }

    #[instrument(skip_all, fields(role = "login", peer = %conn.peer()))]
    async fn session(self: Arc<Self>, mut conn: Connection) {
        let handle = conn.handle().clone();
        let inbound = self.inbound();
        let mut session = LoginSession::default();

        loop {
            let packet = match conn.next_packet().await {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Read loop ended");
                    break;
                }
            };
            let opcode = packet.opcode().unwrap_or_default();
            if let Err(e) = self.handle(&handle, &mut session, opcode, &packet).await {
                if e.is_security_relevant() {
                    warn!(security = true, opcode = %inbound.name(opcode), error = %e, "Login request rejected");
                } else {
                    warn!(opcode = %inbound.name(opcode), error = %e, "Login request failed");
                }
                if e.is_fatal_to_connection() {
                    break;
                }
            }
        }

        if let Some(account) = &session.account {
            debug!(account_id = account.id, "Login session ended");
        }
        conn.shutdown().await;
    }

    async fn handle(
        &self,
        conn: &ConnectionHandle,
        session: &mut LoginSession,
        opcode: u16,
        packet: &Packet,
    ) -> Result<()> {
        let mut r = packet.reader();
        match opcode {
            recv::LOGIN_PASSWORD => self.login(conn, session, &mut r).await,
            recv::PONG => Ok(()),
            _ if session.account.is_none() => Err(ServerError::Custom(format!(
                "opcode {opcode:#06x} before authentication"
            ))),
            recv::SERVERLIST_REQUEST | recv::SERVERLIST_REREQUEST => {
                self.world_list(conn);
                Ok(())
            }
            recv::SERVERSTATUS_REQUEST => {
                let world = r.i16()?;
                debug!(world, "World status requested");
                conn.send(packets::server_status(0));
                Ok(())
            }
            recv::CHARLIST_REQUEST => self.char_list(conn, session, &mut r).await,
            recv::CHAR_SELECT => self.select_character(conn, session, &mut r).await,
            _ => {
                debug!(opcode, "Unhandled login opcode");
                Ok(())
            }
        }
    }

    async fn login(
        &self,
        conn: &ConnectionHandle,
        session: &mut LoginSession,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let name = r.str()?;
        let password = r.str()?;

        let account = self.accounts.find_by_name(&name).await?;
        let code = match &account {
            None => login_result::NOT_REGISTERED,
            Some(a) if a.banned => login_result::BANNED,
            Some(a) if !a.check_password(&password) => login_result::WRONG_PASSWORD,
            Some(_) => login_result::SUCCESS,
        };

        match account {
            Some(account) if code == login_result::SUCCESS => {
                info!(account_id = account.id, name = %account.name, "Login accepted");
                conn.send(packets::login_success(&account));
                session.account = Some(account);
            }
            _ => {
                info!(name = %name, code, "Login refused");
                conn.send(packets::login_failed(code));
            }
        }
        Ok(())
    }

    fn world_list(&self, conn: &ConnectionHandle) {
        let mut worlds: BTreeMap<u8, Vec<(u8, i32)>> = BTreeMap::new();
        for channel in &self.config.channels {
            worlds
                .entry(channel.world_id)
                .or_default()
                .push((channel.channel_id, 0));
        }
        for (world_id, mut channels) in worlds {
            channels.sort_unstable();
            conn.send(packets::world_entry(
                world_id,
                &self.config.login.world_name,
                &self.config.login.event_message,
                &channels,
            ));
        }
        conn.send(packets::world_list_end());
    }

    async fn char_list(
        &self,
        conn: &ConnectionHandle,
        session: &mut LoginSession,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let world = r.u8()?;
        let channel = r.u8()?;
        if self.config.channel(world, channel).is_none() {
            return Err(ServerError::Custom(format!(
                "unknown world {world} channel {channel}"
            )));
        }
        let account_id = session.account.as_ref().map_or(0, |a| a.id);
        let characters: Vec<_> = self
            .characters
            .find_by_account_id(account_id)
            .await?
            .into_iter()
            .filter(|c| c.world_id == world)
            .collect();
        session.selected = Some((world, channel));
        debug!(account_id, world, channel, count = characters.len(), "Character list sent");
        conn.send(packets::char_list(&characters, CHARACTER_SLOTS));
        Ok(())
    }

    async fn select_character(
        &self,
        conn: &ConnectionHandle,
        session: &mut LoginSession,
        r: &mut PacketReader<'_>,
    ) -> Result<()> {
        let character_id = r.i32()?;
        let machine_id = r.str()?;

        let Some(account) = session.account.clone() else {
            return Err(ServerError::ConnectionClosed);
        };
        let Some((world, channel)) = session.selected else {
            return Err(ServerError::Custom(String::from(
                "character selected before choosing a channel",
            )));
        };

        let character = self
            .characters
            .find_by_id(character_id)
            .await?
            .ok_or(MigrationError::CharacterMissing(character_id))?;
        if character.account_id != account.id || character.world_id != world {
            global_metrics().migration_rejected();
            return Err(MigrationError::OwnershipMismatch {
                character_id,
                account_id: account.id,
            }
            .into());
        }

        let address = channel_address(&self.config, world, channel)?;
        self.migrations.create(MigrationRequest {
            character_id,
            account,
            target_world: world,
            target_channel: channel,
            machine_id,
            client_key: rand::random::<i64>(),
        });
        info!(character_id, world, channel, address = %address, "Character selected, redirecting");
        conn.send(packets::server_ip(address, character_id));
        Ok(())
    }
}

impl SessionHandler for LoginService {
    fn role(&self) -> &'static str {
        "login"
    }

    fn inbound(&self) -> OpcodeTable {
        OpcodeTable::login_inbound()
    }

    fn run(self: Arc<Self>, conn: Connection) -> BoxFuture<'static, ()> {
        self.session(conn).boxed()
    }
}
