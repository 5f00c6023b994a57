//! Field lifecycle and room broadcast behavior under concurrency.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use legacy_gameserver::config::DEFAULT_MAP_ID;
use legacy_gameserver::core::packet::PacketWriter;
use legacy_gameserver::data::{MapData, MapProvider, StaticMaps};
use legacy_gameserver::protocol::movement::Point;
use legacy_gameserver::repository;
use legacy_gameserver::transport::ConnectionHandle;
use legacy_gameserver::world::{Character, Field, FieldManager, FieldSettings, TickHook};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const SNAIL_MAP: i32 = 100_010_000;

fn settings(tick: Duration) -> FieldSettings {
    FieldSettings {
        tick_interval: tick,
        object_id_seed: 1000,
    }
}

fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

fn character(id: i32) -> (Arc<Character>, mpsc::Receiver<legacy_gameserver::core::packet::Packet>) {
    let (conn, rx) = ConnectionHandle::detached(peer(), 4096);
    let record = repository::Character::new(id, id, 0, &format!("char{id}"));
    (Character::new(record, Vec::new(), Point::new(0, 0), conn), rx)
}

/// Map source that counts how many fields were built from it.
struct CountingMaps {
    inner: StaticMaps,
    lookups: AtomicUsize,
}

impl MapProvider for CountingMaps {
    fn map(&self, id: i32) -> Option<Arc<MapData>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.map(id)
    }
}

/// Serials of every field that ran a tick.
#[derive(Default)]
struct TickedSerials(Mutex<HashSet<u64>>);

impl TickHook for TickedSerials {
    fn on_tick(&self, field: &Field) {
        self.0.lock().insert(field.serial());
    }
}

fn drain(rx: &mut mpsc::Receiver<legacy_gameserver::core::packet::Packet>) -> Vec<u16> {
    let mut opcodes = Vec::new();
    while let Ok(packet) = rx.try_recv() {
        opcodes.push(packet.opcode().unwrap());
    }
    opcodes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_lookups_share_one_field() {
    let data = Arc::new(StaticMaps::builtin());
    let maps = Arc::new(CountingMaps {
        inner: StaticMaps::builtin(),
        lookups: AtomicUsize::new(0),
    });
    let ticked = Arc::new(TickedSerials::default());
    let tick = Duration::from_millis(20);
    let manager = Arc::new(
        FieldManager::new(maps.clone(), data, settings(tick)).with_tick_hook(ticked.clone()),
    );

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let manager = manager.clone();
        tasks.spawn(async move { manager.get_or_create(DEFAULT_MAP_ID).await.unwrap() });
    }

    let mut fields = Vec::new();
    while let Some(res) = tasks.join_next().await {
        fields.push(res.unwrap());
    }
    let first = fields[0].clone();
    assert!(fields.iter().all(|f| Arc::ptr_eq(f, &first)));
    assert!(fields.iter().all(|f| f.serial() == first.serial()));
    assert_eq!(manager.count(), 1);
    assert!(!first.is_closed());
    // Only one caller ran the creation path.
    assert_eq!(maps.lookups.load(Ordering::SeqCst), 1);

    while first.ticks() < 3 {
        tokio::time::sleep(tick).await;
    }
    assert_eq!(*ticked.0.lock(), HashSet::from([first.serial()]));
    manager.clear();
}

#[tokio::test(start_paused = true)]
async fn published_field_ticks_and_closed_field_never_does() {
    let data = StaticMaps::builtin();
    let map = data.map(SNAIL_MAP).unwrap();
    let tick = Duration::from_millis(50);

    let kept = Field::new(map.clone(), &data, &settings(tick), Vec::new());
    let discarded = Field::new(map, &data, &settings(tick), Vec::new());
    discarded.close();
    assert_ne!(kept.serial(), discarded.serial());

    for _ in 0..5 {
        tokio::time::advance(tick).await;
        tokio::task::yield_now().await;
    }

    assert!(kept.ticks() >= 1);
    assert_eq!(discarded.ticks(), 0);
    assert!(discarded.is_closed());
    kept.close();
}

#[tokio::test]
async fn spawned_life_gets_distinct_object_ids() {
    let data = StaticMaps::builtin();
    let field = Field::new(data.map(SNAIL_MAP).unwrap(), &data, &settings(Duration::from_secs(60)), Vec::new());
    let mut ids: Vec<i32> = field.mobs().get_all().iter().map(|m| m.object_id()).collect();
    assert_eq!(ids.len(), 2);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 2);
    assert!(field.next_object_id().unwrap() > ids[1]);
    field.close();
}

#[tokio::test]
async fn room_membership_controls_delivery() {
    let data = StaticMaps::builtin();
    let field = Field::new(data.map(SNAIL_MAP).unwrap(), &data, &settings(Duration::from_secs(60)), Vec::new());

    let (a, mut rx_a) = character(1);
    let (b, mut rx_b) = character(2);
    field.add_character(&a);
    field.add_character(&b);
    drain(&mut rx_a);
    drain(&mut rx_b);

    let chat = PacketWriter::new(0xA2).i32(1).str("hello").build();
    assert_eq!(field.characters().broadcast_except(&chat, 1), 1);
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(drain(&mut rx_b), vec![0xA2]);

    field.remove_character(2);
    assert_eq!(field.characters().broadcast(&chat), 1);
    assert!(drain(&mut rx_b).is_empty());
    field.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removal_during_broadcast_storm_is_safe() {
    let data = StaticMaps::builtin();
    let field = Field::new(data.map(SNAIL_MAP).unwrap(), &data, &settings(Duration::from_secs(60)), Vec::new());

    let mut receivers = Vec::new();
    for id in 1..=20 {
        let (c, rx) = character(id);
        field.add_character(&c);
        receivers.push(rx);
    }

    let packet = PacketWriter::new(0x01).u8(0).build();
    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let field = field.clone();
        let packet = packet.clone();
        tasks.spawn(async move {
            for _ in 0..200 {
                field.characters().broadcast(&packet);
                tokio::task::yield_now().await;
            }
        });
    }
    {
        let field = field.clone();
        tasks.spawn(async move {
            for id in (1..=20).step_by(2) {
                field.remove_character(id);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(field.characters().count(), 10);
    for (index, rx) in receivers.iter_mut().enumerate() {
        drain(rx);
        let id = index as i32 + 1;
        field.characters().broadcast(&packet);
        let got = drain(rx);
        if id % 2 == 1 {
            assert!(got.is_empty(), "removed character {id} still received");
        } else {
            assert_eq!(got, vec![0x01]);
        }
    }
    field.close();
}

#[tokio::test]
async fn mob_damage_clamps_and_kill_removes() {
    let data = StaticMaps::builtin();
    let field = Field::new(data.map(SNAIL_MAP).unwrap(), &data, &settings(Duration::from_secs(60)), Vec::new());
    let mob = field.mobs().get_all().pop().unwrap();
    let id = mob.object_id();

    let outcome = field.mobs().damage(id, 130).unwrap();
    assert_eq!(outcome.applied, 8);
    assert!(outcome.killed());
    assert!(field.kill_mob(id).is_some());
    assert!(field.kill_mob(id).is_none());
    assert!(field.mobs().damage(id, 1).is_none());
    field.close();
}
