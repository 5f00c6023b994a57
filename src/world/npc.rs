use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::NpcSpawn;
use crate::protocol::movement::Point;
use crate::world::registry::Entity;

/// A spawned NPC. The controller is a character id, looked up in the field's
/// character registry when needed.
#[derive(Debug)]
pub struct Npc {
    object_id: i32,
    spawn: NpcSpawn,
    controller: Mutex<Option<i32>>,
}

impl Npc {
    pub fn new(object_id: i32, spawn: NpcSpawn) -> Arc<Self> {
        Arc::new(Self {
            object_id,
            spawn,
            controller: Mutex::new(None),
        })
    }

    pub fn object_id(&self) -> i32 {
        self.object_id
    }

    pub fn template_id(&self) -> i32 {
        self.spawn.npc_id
    }

    pub fn spawn(&self) -> &NpcSpawn {
        &self.spawn
    }

    pub fn position(&self) -> Point {
        Point::new(self.spawn.x, self.spawn.y)
    }

    pub fn controller(&self) -> Option<i32> {
        *self.controller.lock()
    }

    pub fn set_controller(&self, controller: Option<i32>) {
        *self.controller.lock() = controller;
    }
}

impl Entity for Npc {
    type Key = i32;

    fn key(&self) -> i32 {
        self.object_id
    }
}
