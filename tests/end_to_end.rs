//! Live listeners driven over TCP through the client codec.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use legacy_gameserver::cipher::KeySchedule;
use legacy_gameserver::config::{ChannelConfig, ServerConfig, DEFAULT_MAP_ID};
use legacy_gameserver::core::packet::{Packet, PacketWriter};
use legacy_gameserver::data::StaticMaps;
use legacy_gameserver::protocol::movement::{Motion, MoveElem, MovePath, Point};
use legacy_gameserver::protocol::opcode::{recv, send};
use legacy_gameserver::repository::{
    self, hash_password, Account, CharacterRepository, MemoryStore, Repositories,
};
use legacy_gameserver::script::{BuiltinScripts, ScriptExecutor};
use legacy_gameserver::service::packets::stat;
use legacy_gameserver::service::{ChannelService, LoginService, MigrationManager, MigrationRequest};
use legacy_gameserver::transport::client::ClientConnection;
use legacy_gameserver::transport::listener::serve;
use legacy_gameserver::transport::TransportSettings;
use legacy_gameserver::world::{Field, FieldManager, FieldSettings};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(3);
const ALICE: i32 = 7;
const BOB: i32 = 8;
const ALICE_CHAR: i32 = 42;
const BOB_CHAR: i32 = 43;
const SNAIL_MAP: i32 = 100_010_000;

struct Cluster {
    login: SocketAddr,
    channels: Vec<SocketAddr>,
    store: Arc<MemoryStore>,
    migrations: Arc<MigrationManager>,
    /// One field manager per channel, indexed like `channels`.
    fields: Vec<Arc<FieldManager>>,
    shutdown: CancellationToken,
}

impl Cluster {
    fn field(&self, channel: usize, map_id: i32) -> Arc<Field> {
        self.fields[channel].get(map_id).unwrap()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for fields in &self.fields {
            fields.clear();
        }
    }
}

fn account(id: i32, name: &str, password: &str) -> Account {
    Account {
        id,
        name: name.to_string(),
        password_hash: hash_password(password),
        banned: false,
        gender: 0,
        gm_level: 0,
    }
}

async fn start_cluster() -> Cluster {
    let schedule = KeySchedule::init();

    let login_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let login = login_listener.local_addr().unwrap();
    let mut channel_listeners = Vec::new();
    for _ in 0..2 {
        channel_listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let channels: Vec<SocketAddr> = channel_listeners
        .iter()
        .map(|l| l.local_addr().unwrap())
        .collect();

    let mut config = ServerConfig::default();
    config.login.address = login.to_string();
    config.channels = channels
        .iter()
        .enumerate()
        .map(|(i, addr)| ChannelConfig {
            world_id: 0,
            channel_id: i as u8 + 1,
            address: addr.to_string(),
        })
        .collect();
    config.timeouts.field_tick = Duration::from_millis(50);
    assert!(config.validate().is_empty(), "{:?}", config.validate());
    let config = Arc::new(config);

    let store = Arc::new(MemoryStore::new());
    store.insert_account(account(ALICE, "alice", "secret"));
    store.insert_account(account(BOB, "bob", "hunter2"));
    store.insert_character(repository::Character::new(ALICE_CHAR, ALICE, 0, "Alice"));
    store.insert_character(repository::Character::new(BOB_CHAR, BOB, 0, "Bob"));
    let repos = Repositories::memory(store.clone());

    let data = Arc::new(StaticMaps::builtin());
    let migrations = Arc::new(MigrationManager::new(config.timeouts.migration_ttl));
    let field_settings = FieldSettings {
        tick_interval: config.timeouts.field_tick,
        object_id_seed: config.world.object_id_seed,
    };
    let scripts: Arc<dyn ScriptExecutor> = Arc::new(BuiltinScripts::with_defaults());
    let settings = TransportSettings::from_config(&config);
    let shutdown = CancellationToken::new();

    let login_service = Arc::new(LoginService::new(
        config.clone(),
        repos.accounts.clone(),
        repos.characters.clone(),
        migrations.clone(),
    ));
    tokio::spawn(serve(
        login_listener,
        login_service,
        schedule.clone(),
        settings.clone(),
        shutdown.clone(),
        Duration::from_secs(1),
    ));

    let mut fields = Vec::new();
    for (i, listener) in channel_listeners.into_iter().enumerate() {
        let channel_fields = Arc::new(FieldManager::new(data.clone(), data.clone(), field_settings.clone()));
        fields.push(channel_fields.clone());
        let service = Arc::new(ChannelService::new(
            config.clone(),
            0,
            i as u8 + 1,
            repos.clone(),
            migrations.clone(),
            channel_fields,
            data.clone(),
            scripts.clone(),
        ));
        tokio::spawn(serve(
            listener,
            service,
            schedule.clone(),
            settings.clone(),
            shutdown.clone(),
            Duration::from_secs(1),
        ));
    }

    Cluster {
        login,
        channels,
        store,
        migrations,
        fields,
        shutdown,
    }
}

fn migration_for(character_id: i32, account: Account, channel: u8) -> MigrationRequest {
    MigrationRequest {
        character_id,
        account,
        target_world: 0,
        target_channel: channel,
        machine_id: String::from("00-11-22"),
        client_key: 99,
    }
}

fn login_packet(name: &str, password: &str) -> Packet {
    PacketWriter::new(recv::LOGIN_PASSWORD).str(name).str(password).build()
}

fn migrate_in_packet(character_id: i32) -> Packet {
    PacketWriter::new(recv::PLAYER_LOGGEDIN).i32(character_id).build()
}

async fn login_status(client: &mut ClientConnection, name: &str, password: &str) -> u8 {
    client.send(login_packet(name, password)).await.unwrap();
    let reply = client.recv_opcode(send::LOGIN_STATUS).await.unwrap();
    reply.reader().u8().unwrap()
}

/// Migrate a character into `channel` (an index into `Cluster::channels`)
/// and wait for `ready`, a packet only sent once the character is in the
/// room registry.
async fn enter(
    cluster: &Cluster,
    channel: usize,
    character_id: i32,
    account: Account,
    ready: u16,
) -> (ClientConnection, Packet) {
    cluster
        .migrations
        .create(migration_for(character_id, account, channel as u8 + 1));
    let mut client = ClientConnection::connect(cluster.channels[channel], TIMEOUT).await.unwrap();
    client.send(migrate_in_packet(character_id)).await.unwrap();
    client.recv_opcode(send::SET_FIELD).await.unwrap();
    let packet = client.recv_opcode(ready).await.unwrap();
    (client, packet)
}

/// Enter channel 1 on the starter map. Returns the client and the starter
/// NPC's object id.
async fn enter_channel(cluster: &Cluster, character_id: i32, account: Account) -> (ClientConnection, i32) {
    let (client, npc) = enter(cluster, 0, character_id, account, send::SPAWN_NPC).await;
    let object_id = npc.reader().i32().unwrap();
    (client, object_id)
}

/// Store the character on the snail map and enter it on channel 1. Returns
/// the client and the object id of the first mob it was shown.
async fn enter_snail_map(
    cluster: &Cluster,
    character_id: i32,
    account: Account,
) -> (ClientConnection, i32) {
    let mut stored = repository::Character::new(character_id, account.id, 0, &account.name);
    stored.map_id = SNAIL_MAP;
    cluster.store.insert_character(stored);
    let (client, mob) = enter(cluster, 0, character_id, account, send::SPAWN_MONSTER).await;
    let object_id = mob.reader().i32().unwrap();
    (client, object_id)
}

/// Opcodes received before the next packet with `opcode`.
async fn opcodes_until(client: &mut ClientConnection, opcode: u16) -> Vec<u16> {
    let mut seen = Vec::new();
    loop {
        let packet = client.recv().await.unwrap().expect("connection closed");
        match packet.opcode() {
            Some(op) if op == opcode => return seen,
            Some(op) => seen.push(op),
            None => {}
        }
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn chat_packet(text: &str) -> Packet {
    PacketWriter::new(recv::GENERAL_CHAT).str(text).u8(0).build()
}

fn teleport_to(x: i16, y: i16) -> MovePath {
    MovePath {
        start: Point::new(0, 0),
        start_velocity: Point::default(),
        elems: vec![MoveElem::Teleport {
            attr: 10,
            pos: Point::new(x, y),
            foothold: 3,
            motion: Motion {
                action: 4,
                elapse: 0,
            },
        }],
    }
}

fn move_player_packet(field_key: u8, path: &MovePath) -> Packet {
    let mut w = PacketWriter::new(recv::MOVE_PLAYER);
    w.u8(field_key);
    path.encode(&mut w);
    w.build()
}

fn move_life_packet(object_id: i32, move_id: i16, path: &MovePath) -> Packet {
    let mut w = PacketWriter::new(recv::MOVE_LIFE);
    w.i32(object_id).i16(move_id).bool(false).u8(0);
    path.encode(&mut w);
    w.build()
}

fn attack_packet(object_id: i32, damage: &[i32]) -> Packet {
    let mut w = PacketWriter::new(recv::CLOSE_RANGE_ATTACK);
    w.u8((1 << 4) | damage.len() as u8).i32(0).i32(object_id);
    for d in damage {
        w.i32(*d);
    }
    w.build()
}

#[tokio::test]
async fn login_through_channel_migrate_in() {
    let cluster = start_cluster().await;
    let mut login = ClientConnection::connect(cluster.login, TIMEOUT).await.unwrap();

    assert_eq!(login_status(&mut login, "alice", "secret").await, 0);

    login
        .send(PacketWriter::new(recv::SERVERLIST_REQUEST).build())
        .await
        .unwrap();
    let world = login.recv_opcode(send::SERVERLIST).await.unwrap();
    let mut r = world.reader();
    assert_eq!(r.u8().unwrap(), 0);

    login
        .send(PacketWriter::new(recv::CHARLIST_REQUEST).u8(0).u8(1).build())
        .await
        .unwrap();
    login.recv_opcode(send::CHARLIST).await.unwrap();

    login
        .send(
            PacketWriter::new(recv::CHAR_SELECT)
                .i32(ALICE_CHAR)
                .str("00-11-22")
                .build(),
        )
        .await
        .unwrap();
    let redirect = login.recv_opcode(send::SERVER_IP).await.unwrap();
    let mut r = redirect.reader();
    r.u16().unwrap();
    assert_eq!(r.bytes(4).unwrap(), [127, 0, 0, 1]);
    assert_eq!(r.u16().unwrap(), cluster.channels[0].port());
    assert_eq!(r.i32().unwrap(), ALICE_CHAR);
    assert!(cluster.migrations.exists(ALICE_CHAR));

    let mut channel = ClientConnection::connect(cluster.channels[0], TIMEOUT).await.unwrap();
    channel.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    let set_field = channel.recv_opcode(send::SET_FIELD).await.unwrap();
    let mut r = set_field.reader();
    assert_eq!(r.i32().unwrap(), 1);
    r.u8().unwrap();
    assert!(r.bool().unwrap(), "first field entry is the full character load");

    // The starter map has an NPC; its spawn follows the field packet.
    channel.recv_opcode(send::SPAWN_NPC).await.unwrap();
    assert!(!cluster.migrations.exists(ALICE_CHAR));
    let field = cluster.field(0, DEFAULT_MAP_ID);
    assert!(field.characters().contains(ALICE_CHAR));
}

#[tokio::test]
async fn login_refusals_use_result_codes() {
    let cluster = start_cluster().await;
    let mut client = ClientConnection::connect(cluster.login, TIMEOUT).await.unwrap();

    assert_eq!(login_status(&mut client, "nobody", "x").await, 5);
    assert_eq!(login_status(&mut client, "alice", "wrong").await, 4);
    cluster.store.set_banned(ALICE, true);
    assert_eq!(login_status(&mut client, "alice", "secret").await, 3);
}

#[tokio::test]
async fn requests_before_login_close_the_connection() {
    let cluster = start_cluster().await;
    let mut client = ClientConnection::connect(cluster.login, TIMEOUT).await.unwrap();
    client
        .send(PacketWriter::new(recv::CHARLIST_REQUEST).u8(0).u8(1).build())
        .await
        .unwrap();
    assert!(client.expect_closed().await);
}

#[tokio::test]
async fn selecting_another_accounts_character_is_rejected() {
    let cluster = start_cluster().await;
    let mut client = ClientConnection::connect(cluster.login, TIMEOUT).await.unwrap();
    assert_eq!(login_status(&mut client, "alice", "secret").await, 0);
    client
        .send(PacketWriter::new(recv::CHARLIST_REQUEST).u8(0).u8(1).build())
        .await
        .unwrap();
    client.recv_opcode(send::CHARLIST).await.unwrap();
    client
        .send(PacketWriter::new(recv::CHAR_SELECT).i32(BOB_CHAR).str("x").build())
        .await
        .unwrap();
    assert!(client.expect_closed().await);
    assert!(!cluster.migrations.exists(BOB_CHAR));
}

#[tokio::test]
async fn migrate_in_without_record_is_dropped() {
    let cluster = start_cluster().await;
    let mut client = ClientConnection::connect(cluster.channels[0], TIMEOUT).await.unwrap();
    client.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    assert!(client.expect_closed().await);
    assert!(cluster.fields[0].get(DEFAULT_MAP_ID).map_or(true, |f| !f.characters().contains(ALICE_CHAR)));
}

#[tokio::test]
async fn record_for_another_channel_is_consumed_and_rejected() {
    let cluster = start_cluster().await;
    cluster
        .migrations
        .create(migration_for(ALICE_CHAR, account(ALICE, "alice", "secret"), 1));

    let mut client = ClientConnection::connect(cluster.channels[1], TIMEOUT).await.unwrap();
    client.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    assert!(client.expect_closed().await);
    assert!(cluster.migrations.consume(ALICE_CHAR).is_none());
}

#[tokio::test]
async fn record_cannot_be_replayed() {
    let cluster = start_cluster().await;
    let _first = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;

    let mut replay = ClientConnection::connect(cluster.channels[0], TIMEOUT).await.unwrap();
    replay.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    assert!(replay.expect_closed().await);
}

#[tokio::test]
async fn chat_reaches_others_in_the_room() {
    let cluster = start_cluster().await;
    let (mut alice, _) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let (mut bob, _) = enter_channel(&cluster, BOB_CHAR, account(BOB, "bob", "hunter2")).await;
    alice.recv_opcode(send::SPAWN_PLAYER).await.unwrap();

    alice
        .send(PacketWriter::new(recv::GENERAL_CHAT).str("hello bob").u8(0).build())
        .await
        .unwrap();
    let chat = bob.recv_opcode(send::CHATTEXT).await.unwrap();
    let mut r = chat.reader();
    assert_eq!(r.i32().unwrap(), ALICE_CHAR);
    r.bool().unwrap();
    assert_eq!(r.str().unwrap(), "hello bob");
}

#[tokio::test]
async fn disconnect_leaves_the_field_and_persists() {
    let cluster = start_cluster().await;
    let (alice, _) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let field = cluster.field(0, DEFAULT_MAP_ID);
    assert!(field.characters().contains(ALICE_CHAR));

    drop(alice);
    eventually("the character left the field", || !field.characters().contains(ALICE_CHAR)).await;
}

#[tokio::test]
async fn taxi_script_warps_to_the_chosen_map() {
    let cluster = start_cluster().await;
    let (mut alice, object_id) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;

    alice
        .send(PacketWriter::new(recv::NPC_TALK).i32(object_id).build())
        .await
        .unwrap();
    alice.recv_opcode(send::NPC_TALK).await.unwrap();
    alice
        .send(PacketWriter::new(recv::NPC_TALK_MORE).u8(4).i8(1).i32(1).build())
        .await
        .unwrap();
    alice.recv_opcode(send::NPC_TALK).await.unwrap();
    alice
        .send(PacketWriter::new(recv::NPC_TALK_MORE).u8(1).i8(1).build())
        .await
        .unwrap();

    let set_field = alice.recv_opcode(send::SET_FIELD).await.unwrap();
    let mut r = set_field.reader();
    assert_eq!(r.i32().unwrap(), 1);
    r.u8().unwrap();
    assert!(!r.bool().unwrap());
    assert_eq!(r.i32().unwrap(), 100_010_000);
    alice.recv_opcode(send::SPAWN_MONSTER).await.unwrap();

    let hunting_ground = cluster.field(0, SNAIL_MAP);
    assert!(hunting_ground.characters().contains(ALICE_CHAR));
    assert!(!cluster.field(0, DEFAULT_MAP_ID).characters().contains(ALICE_CHAR));
}

#[tokio::test]
async fn channels_keep_separate_map_instances() {
    let cluster = start_cluster().await;
    let (mut alice, _) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let (mut bob, _) = enter(&cluster, 1, BOB_CHAR, account(BOB, "bob", "hunter2"), send::SPAWN_NPC).await;

    let first = cluster.field(0, DEFAULT_MAP_ID);
    let second = cluster.field(1, DEFAULT_MAP_ID);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.serial(), second.serial());
    assert_eq!(first.characters().count(), 1);
    assert_eq!(second.characters().count(), 1);

    // Chat echoes to the sender, so once Alice sees her own line everything
    // queued for her before it has arrived.
    alice.send(chat_packet("anyone on channel 1?")).await.unwrap();
    let before = opcodes_until(&mut alice, send::CHATTEXT).await;
    assert!(!before.contains(&send::SPAWN_PLAYER), "saw a player from another channel");

    bob.send(chat_packet("channel 2 here")).await.unwrap();
    let chat = bob.recv_opcode(send::CHATTEXT).await.unwrap();
    assert_eq!(chat.reader().i32().unwrap(), BOB_CHAR);
}

#[tokio::test]
async fn ban_after_record_creation_rejects_migrate_in() {
    let cluster = start_cluster().await;
    cluster
        .migrations
        .create(migration_for(ALICE_CHAR, account(ALICE, "alice", "secret"), 1));
    cluster.store.set_banned(ALICE, true);

    let mut client = ClientConnection::connect(cluster.channels[0], TIMEOUT).await.unwrap();
    client.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    assert!(client.expect_closed().await);
    assert!(!cluster.migrations.exists(ALICE_CHAR));
    assert!(cluster.fields[0].get(DEFAULT_MAP_ID).map_or(true, |f| !f.characters().contains(ALICE_CHAR)));
}

#[tokio::test]
async fn change_channel_saves_and_redirects() {
    let cluster = start_cluster().await;
    let (mut alice, _) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    cluster
        .field(0, DEFAULT_MAP_ID)
        .characters()
        .get(ALICE_CHAR)
        .unwrap()
        .state()
        .record
        .meso = 777;

    alice
        .send(PacketWriter::new(recv::CHANGE_CHANNEL).u8(2).build())
        .await
        .unwrap();
    let redirect = alice.recv_opcode(send::CHANGE_CHANNEL).await.unwrap();
    let mut r = redirect.reader();
    assert_eq!(r.u8().unwrap(), 1);
    assert_eq!(r.bytes(4).unwrap(), [127, 0, 0, 1]);
    assert_eq!(r.u16().unwrap(), cluster.channels[1].port());
    assert!(alice.expect_closed().await);

    // Saved and deregistered before the new record was handed out.
    let saved = CharacterRepository::find_by_id(cluster.store.as_ref(), ALICE_CHAR)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.meso, 777);
    assert!(!cluster.field(0, DEFAULT_MAP_ID).characters().contains(ALICE_CHAR));
    assert!(cluster.migrations.exists(ALICE_CHAR));

    let mut moved = ClientConnection::connect(cluster.channels[1], TIMEOUT).await.unwrap();
    moved.send(migrate_in_packet(ALICE_CHAR)).await.unwrap();
    let set_field = moved.recv_opcode(send::SET_FIELD).await.unwrap();
    assert_eq!(set_field.reader().i32().unwrap(), 2);
    moved.recv_opcode(send::SPAWN_NPC).await.unwrap();
    let arrived = cluster.field(1, DEFAULT_MAP_ID).characters().get(ALICE_CHAR).unwrap();
    assert_eq!(arrived.state().record.meso, 777);
}

#[tokio::test]
async fn movement_with_stale_field_key_is_ignored() {
    let cluster = start_cluster().await;
    let (mut alice, _) = enter_channel(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let (mut bob, _) = enter_channel(&cluster, BOB_CHAR, account(BOB, "bob", "hunter2")).await;
    alice.recv_opcode(send::SPAWN_PLAYER).await.unwrap();

    let character = cluster.field(0, DEFAULT_MAP_ID).characters().get(ALICE_CHAR).unwrap();
    let key = character.field_key();

    let stale = teleport_to(11, 11);
    alice
        .send(move_player_packet(key.wrapping_add(1), &stale))
        .await
        .unwrap();
    let current = teleport_to(222, 33);
    alice.send(move_player_packet(key, &current)).await.unwrap();

    // Packets from one session are handled in order, so the first relayed
    // movement Bob sees is the one that counted.
    let relayed = bob.recv_opcode(send::MOVE_PLAYER).await.unwrap();
    let mut r = relayed.reader();
    assert_eq!(r.i32().unwrap(), ALICE_CHAR);
    r.i32().unwrap();
    assert_eq!(MovePath::decode(&mut r).unwrap(), current);
    assert_eq!(character.position(), Point::new(222, 33));
}

#[tokio::test]
async fn mob_movement_only_from_its_controller() {
    let cluster = start_cluster().await;
    let (mut alice, object_id) = enter_snail_map(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let (mut bob, _) = enter_snail_map(&cluster, BOB_CHAR, account(BOB, "bob", "hunter2")).await;
    alice.recv_opcode(send::SPAWN_PLAYER).await.unwrap();

    let mob = cluster.field(0, SNAIL_MAP).mobs().get(object_id).unwrap();
    assert_eq!(mob.controller(), Some(ALICE_CHAR));
    let spawned_at = mob.state().position;

    bob.send(move_life_packet(object_id, 1, &teleport_to(-999, 200)))
        .await
        .unwrap();
    bob.send(chat_packet("moved?")).await.unwrap();
    let bob_saw = opcodes_until(&mut bob, send::CHATTEXT).await;
    assert!(!bob_saw.contains(&send::MOVE_MONSTER_RESPONSE));
    let alice_saw = opcodes_until(&mut alice, send::CHATTEXT).await;
    assert!(!alice_saw.contains(&send::MOVE_MONSTER));
    assert_eq!(mob.state().position, spawned_at);

    alice
        .send(move_life_packet(object_id, 2, &teleport_to(123, 200)))
        .await
        .unwrap();
    let response = alice.recv_opcode(send::MOVE_MONSTER_RESPONSE).await.unwrap();
    let mut r = response.reader();
    assert_eq!(r.i32().unwrap(), object_id);
    assert_eq!(r.i16().unwrap(), 2);
    let relayed = bob.recv_opcode(send::MOVE_MONSTER).await.unwrap();
    assert_eq!(relayed.reader().i32().unwrap(), object_id);
    assert_eq!(mob.state().position, Point::new(123, 200));
}

#[tokio::test]
async fn attack_clamps_damage_kills_and_awards_exp() {
    let cluster = start_cluster().await;
    let (mut alice, object_id) = enter_snail_map(&cluster, ALICE_CHAR, account(ALICE, "alice", "secret")).await;
    let field = cluster.field(0, SNAIL_MAP);
    let mob = field.mobs().get(object_id).unwrap();
    assert_eq!(mob.hp(), 8);

    alice.send(attack_packet(object_id, &[5])).await.unwrap();
    eventually("the first hit landed", || mob.hp() == 3).await;
    assert!(field.mobs().contains(object_id));

    alice.send(attack_packet(object_id, &[100, 30])).await.unwrap();
    let killed = alice.recv_opcode(send::KILL_MONSTER).await.unwrap();
    assert_eq!(killed.reader().i32().unwrap(), object_id);
    assert_eq!(mob.hp(), 0);
    assert!(!field.mobs().contains(object_id));
    assert_eq!(field.mobs().count(), 1);

    let exp = loop {
        let update = alice.recv_opcode(send::STAT_CHANGED).await.unwrap();
        let mut r = update.reader();
        // Skip the empty action-enable update.
        if r.u8().unwrap() == 0 && r.i32().unwrap() == stat::EXP {
            break r.i32().unwrap();
        }
    };
    assert_eq!(exp, 3);
    let character = field.characters().get(ALICE_CHAR).unwrap();
    assert_eq!(character.state().record.exp, 3);
}
