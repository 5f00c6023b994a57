//! Mobs and the mob-specific registry views.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::data::{MobData, MobSpawn};
use crate::protocol::movement::{Movable, Point};
use crate::world::registry::{Entity, EntityRegistry};

#[derive(Debug, Clone)]
pub struct MobState {
    pub hp: i32,
    pub position: Point,
    pub foothold: i16,
    pub stance: u8,
    pub hidden: bool,
    /// Id of the controlling character, if any.
    pub controller: Option<i32>,
}

impl Movable for MobState {
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
pub struct Mob {
    object_id: i32,
    template: Arc<MobData>,
    /// Index of the spawn point this mob came from.
    spawn_index: usize,
    state: Mutex<MobState>,
}

/// Result of a damage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    /// HP actually removed, never more than the HP the mob had.
    pub applied: i32,
    pub remaining: i32,
}

impl DamageOutcome {
    pub fn killed(&self) -> bool {
        self.remaining == 0 && self.applied > 0
    }
}

impl Mob {
    pub fn new(object_id: i32, template: Arc<MobData>, spawn_index: usize, spawn: &MobSpawn) -> Arc<Self> {
        let hp = template.max_hp.max(1);
        Arc::new(Self {
            object_id,
            template,
            spawn_index,
            state: Mutex::new(MobState {
                hp,
                position: spawn.position(),
                foothold: spawn.foothold,
                stance: 5,
                hidden: false,
                controller: None,
            }),
        })
    }

    pub fn object_id(&self) -> i32 {
        self.object_id
    }

    pub fn template(&self) -> &MobData {
        &self.template
    }

    pub fn spawn_index(&self) -> usize {
        self.spawn_index
    }

    pub fn state(&self) -> MutexGuard<'_, MobState> {
        self.state.lock()
    }

    pub fn hp(&self) -> i32 {
        self.state.lock().hp
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().hp > 0
    }

    pub fn controller(&self) -> Option<i32> {
        self.state.lock().controller
    }

    pub fn set_controller(&self, controller: Option<i32>) {
        self.state.lock().controller = controller;
    }

    /// Remove up to `amount` HP.
    pub fn take_damage(&self, amount: i32) -> DamageOutcome {
        let mut state = self.state.lock();
        let applied = amount.clamp(0, state.hp.max(0));
        state.hp -= applied;
        DamageOutcome {
            applied,
            remaining: state.hp,
        }
    }
}

impl Entity for Mob {
    type Key = i32;

    fn key(&self) -> i32 {
        self.object_id
    }
}

impl EntityRegistry<Mob> {
    pub fn get_alive(&self) -> Vec<Arc<Mob>> {
        self.get_all().into_iter().filter(|m| m.is_alive()).collect()
    }

    /// Alive and not hidden.
    pub fn get_visible(&self) -> Vec<Arc<Mob>> {
        self.get_all()
            .into_iter()
            .filter(|m| {
                let state = m.state();
                state.hp > 0 && !state.hidden
            })
            .collect()
    }

    /// Damage a registered mob; `None` if no mob has that id.
    pub fn damage(&self, object_id: i32, amount: i32) -> Option<DamageOutcome> {
        self.get(object_id).map(|mob| mob.take_damage(amount))
    }
}
