//! One running map instance.
//!
//! A field owns its three registries, its object-id counter and a tick task.
//! The tick task holds only a weak reference, stops on [`Field::close`], and
//! runs each tick inside `catch_unwind` so a faulting tick is logged and the
//! next one still runs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::data::{MapData, MobData, MobProvider, MobSpawn};
use crate::protocol::movement::Point;
use crate::service::packets;
use crate::utils::global_metrics;
use crate::world::character::Character;
use crate::world::mob::Mob;
use crate::world::npc::Npc;
use crate::world::registry::EntityRegistry;

static NEXT_FIELD_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Observer invoked at the end of every tick.
pub trait TickHook: Send + Sync {
    fn on_tick(&self, field: &Field);
}

#[derive(Debug, Clone)]
pub struct FieldSettings {
    pub tick_interval: Duration,
    pub object_id_seed: i32,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            tick_interval: crate::utils::timeout::FIELD_TICK_INTERVAL,
            object_id_seed: crate::config::OBJECT_ID_SEED,
        }
    }
}

struct SpawnPoint {
    spawn: MobSpawn,
    template: Option<Arc<MobData>>,
    /// Object id of the mob currently alive from this point.
    live: Option<i32>,
    died_at: Option<Instant>,
}

pub struct Field {
    map_id: i32,
    serial: u64,
    data: Arc<MapData>,
    next_object_id: Mutex<i32>,
    characters: EntityRegistry<Character>,
    npcs: EntityRegistry<Npc>,
    mobs: EntityRegistry<Mob>,
    spawn_points: Mutex<Vec<SpawnPoint>>,
    ticks: AtomicU64,
    started: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    hooks: Vec<Arc<dyn TickHook>>,
    tick_interval: Duration,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("map_id", &self.map_id)
            .field("serial", &self.serial)
            .field("characters", &self.characters.count())
            .field("ticks", &self.ticks())
            .finish()
    }
}

impl Field {
    /// Build the field, spawn its static life and start ticking.
    pub fn new(
        data: Arc<MapData>,
        mob_templates: &dyn MobProvider,
        settings: &FieldSettings,
        hooks: Vec<Arc<dyn TickHook>>,
    ) -> Arc<Self> {
        let spawn_points = data
            .mobs
            .iter()
            .map(|spawn| {
                let template = mob_templates.mob(spawn.mob_id);
                if template.is_none() {
                    warn!(map_id = data.id, mob_id = spawn.mob_id, "Unknown mob template, spawn point disabled");
                }
                SpawnPoint {
                    spawn: spawn.clone(),
                    template,
                    live: None,
                    died_at: None,
                }
            })
            .collect();

        let field = Arc::new(Self {
            map_id: data.id,
            serial: NEXT_FIELD_SERIAL.fetch_add(1, Ordering::Relaxed),
            data,
            next_object_id: Mutex::new(settings.object_id_seed),
            characters: EntityRegistry::new(),
            npcs: EntityRegistry::new(),
            mobs: EntityRegistry::new(),
            spawn_points: Mutex::new(spawn_points),
            ticks: AtomicU64::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            hooks,
            tick_interval: settings.tick_interval,
        });

        field.spawn_initial_life();
        field.start();
        field
    }

    pub fn map_id(&self) -> i32 {
        self.map_id
    }

    /// Unique per instance, never reused within the process.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn data(&self) -> &MapData {
        &self.data
    }

    pub fn characters(&self) -> &EntityRegistry<Character> {
        &self.characters
    }

    pub fn npcs(&self) -> &EntityRegistry<Npc> {
        &self.npcs
    }

    pub fn mobs(&self) -> &EntityRegistry<Mob> {
        &self.mobs
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Next object id. Strictly increasing, never shared with other fields.
    /// `None` once the id space is exhausted.
    pub fn next_object_id(&self) -> Option<i32> {
        let mut next = self.next_object_id.lock();
        let id = *next;
        match id.checked_add(1) {
            Some(following) => {
                *next = following;
                Some(id)
            }
            None => {
                warn!(map_id = self.map_id, "Object id space exhausted");
                None
            }
        }
    }

    /// Start the tick task. Only the first call has an effect.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.tick_interval;
        let map_id = self.map_id;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(field) = weak.upgrade() else { break };
                field.run_tick();
            }
            debug!(map_id, "Field tick task stopped");
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop ticking. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.task.lock().take();
        debug!(map_id = self.map_id, serial = self.serial, "Field closed");
    }

    fn run_tick(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.tick(Instant::now())));
        if let Err(fault) = result {
            global_metrics().tick_fault();
            error!(
                map_id = self.map_id,
                tick,
                fault = %panic_message(fault.as_ref()),
                "Field tick faulted"
            );
        }
    }

    fn tick(&self, now: Instant) {
        self.respawn_mobs(now);
        self.reassign_controllers();
        for hook in &self.hooks {
            hook.on_tick(self);
        }
        trace!(map_id = self.map_id, "Tick");
    }

    fn spawn_initial_life(&self) {
        for spawn in &self.data.npcs {
            let Some(object_id) = self.next_object_id() else {
                break;
            };
            self.npcs.add(Npc::new(object_id, spawn.clone()));
        }
        let mut points = self.spawn_points.lock();
        for index in 0..points.len() {
            self.spawn_mob_at(index, &mut points[index]);
        }
    }

    fn spawn_mob_at(&self, index: usize, point: &mut SpawnPoint) -> Option<Arc<Mob>> {
        let template = point.template.clone()?;
        let object_id = self.next_object_id()?;
        let mob = Mob::new(object_id, template, index, &point.spawn);
        point.live = Some(mob.object_id());
        point.died_at = None;
        self.mobs.add(mob.clone());
        self.characters.broadcast(&packets::spawn_mob(&mob, true));
        self.assign_mob_controller(&mob);
        Some(mob)
    }

    fn respawn_mobs(&self, now: Instant) {
        let mut points = self.spawn_points.lock();
        for index in 0..points.len() {
            let due = match (&points[index].live, points[index].died_at) {
                (None, Some(died_at)) => now >= died_at + points[index].spawn.respawn_delay(),
                _ => false,
            };
            if due {
                if let Some(mob) = self.spawn_mob_at(index, &mut points[index]) {
                    debug!(map_id = self.map_id, object_id = mob.object_id(), "Mob respawned");
                }
            }
        }
    }

    /// Give uncontrolled life, or life whose controller left, a new controller.
    fn reassign_controllers(&self) {
        for mob in self.mobs.get_alive() {
            let stale = mob
                .controller()
                .map_or(true, |id| !self.characters.contains(id));
            if stale {
                self.assign_mob_controller(&mob);
            }
        }
        for npc in self.npcs.get_all() {
            let stale = npc
                .controller()
                .map_or(true, |id| !self.characters.contains(id));
            if stale {
                self.assign_npc_controller(&npc);
            }
        }
    }

    fn pick_controller(&self) -> Option<Arc<Character>> {
        self.characters
            .get_all()
            .into_iter()
            .filter(|c| c.is_alive())
            .min_by_key(|c| c.id())
    }

    fn assign_mob_controller(&self, mob: &Arc<Mob>) {
        match self.pick_controller() {
            Some(controller) => {
                mob.set_controller(Some(controller.id()));
                controller.send(packets::control_mob(mob, true));
            }
            None => mob.set_controller(None),
        }
    }

    fn assign_npc_controller(&self, npc: &Arc<Npc>) {
        match self.pick_controller() {
            Some(controller) => {
                npc.set_controller(Some(controller.id()));
                controller.send(packets::npc_controller(npc, true));
            }
            None => npc.set_controller(None),
        }
    }

    /// Register a character and exchange spawn packets with the room.
    pub fn add_character(&self, character: &Arc<Character>) {
        if let Some(previous) = self.characters.add(character.clone()) {
            warn!(map_id = self.map_id, character_id = previous.id(), "Replaced stale character entry");
        }
        self.characters
            .broadcast_except(&packets::spawn_player(character), character.id());

        for other in self.characters.get_all() {
            if other.id() != character.id() {
                character.send(packets::spawn_player(&other));
            }
        }
        for npc in self.npcs.get_all() {
            character.send(packets::spawn_npc(&npc));
        }
        for mob in self.mobs.get_visible() {
            character.send(packets::spawn_mob(&mob, false));
        }
        self.reassign_controllers();
        debug!(map_id = self.map_id, character_id = character.id(), "Character entered field");
    }

    /// Deregister a character and hand its controlled life to someone else.
    pub fn remove_character(&self, character_id: i32) -> Option<Arc<Character>> {
        let removed = self.characters.remove(character_id)?;
        self.characters
            .broadcast(&packets::remove_player(character_id));
        for mob in self.mobs.get_all() {
            if mob.controller() == Some(character_id) {
                mob.set_controller(None);
            }
        }
        for npc in self.npcs.get_all() {
            if npc.controller() == Some(character_id) {
                npc.set_controller(None);
            }
        }
        self.reassign_controllers();
        debug!(map_id = self.map_id, character_id, "Character left field");
        Some(removed)
    }

    /// Remove a dead mob and schedule its spawn point.
    pub fn kill_mob(&self, object_id: i32) -> Option<Arc<Mob>> {
        let mob = self.mobs.remove(object_id)?;
        self.characters.broadcast(&packets::kill_mob(object_id, 1));
        let mut points = self.spawn_points.lock();
        if let Some(point) = points.get_mut(mob.spawn_index()) {
            if point.live == Some(object_id) {
                point.live = None;
                point.died_at = Some(Instant::now());
            }
        }
        Some(mob)
    }

    /// Position for an arriving character: the named portal if it exists,
    /// otherwise the map's default spawn. The flag is true when the portal
    /// was found.
    pub fn arrival_point(&self, portal_name: Option<&str>) -> (u8, Point, bool) {
        if let Some(portal) = portal_name.and_then(|name| self.data.portal_by_name(name)) {
            return (portal.id, portal.position(), true);
        }
        let (id, pos) = self.data.default_spawn();
        (id, pos, false)
    }
}

impl Drop for Field {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn panic_message(fault: &(dyn Any + Send)) -> String {
    if let Some(s) = fault.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = fault.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}
