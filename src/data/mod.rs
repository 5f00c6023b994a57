//! # Static Game Data
//!
//! Read-only lookups for map, NPC and mob templates. Fields pull portals and
//! spawn points from here when they are created; the script layer pulls NPC
//! script names. Nothing in the core ever mutates this data.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::config::DEFAULT_MAP_ID;
use crate::error::{Result, ServerError};
use crate::protocol::movement::Point;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Portal {
    pub id: u8,
    pub name: String,
    #[serde(default)]
    pub x: i16,
    #[serde(default)]
    pub y: i16,
    /// 999999999 for portals that lead nowhere
    #[serde(default = "no_target")]
    pub target_map: i32,
    #[serde(default)]
    pub target_portal: String,
}

/// Target value used by spawn points and other dead-end portals.
pub const NO_TARGET_MAP: i32 = 999_999_999;

fn no_target() -> i32 {
    NO_TARGET_MAP
}

impl Portal {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn is_spawn(&self) -> bool {
        self.name == "sp"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NpcSpawn {
    pub npc_id: i32,
    pub x: i16,
    pub y: i16,
    #[serde(default)]
    pub foothold: i16,
    #[serde(default)]
    pub rx0: i16,
    #[serde(default)]
    pub rx1: i16,
    #[serde(default)]
    pub flip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MobSpawn {
    pub mob_id: i32,
    pub x: i16,
    pub y: i16,
    #[serde(default)]
    pub foothold: i16,
    /// Respawn delay in milliseconds
    #[serde(default = "default_respawn_ms")]
    pub respawn_ms: u64,
}

fn default_respawn_ms() -> u64 {
    5_000
}

impl MobSpawn {
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_ms)
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MapData {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    /// Where a character goes on death
    #[serde(default = "default_map")]
    pub return_map: i32,
    #[serde(default)]
    pub portals: Vec<Portal>,
    #[serde(default)]
    pub npcs: Vec<NpcSpawn>,
    #[serde(default)]
    pub mobs: Vec<MobSpawn>,
}

fn default_map() -> i32 {
    DEFAULT_MAP_ID
}

impl MapData {
    pub fn portal_by_name(&self, name: &str) -> Option<&Portal> {
        self.portals.iter().find(|p| p.name == name)
    }

    pub fn portal_by_id(&self, id: u8) -> Option<&Portal> {
        self.portals.iter().find(|p| p.id == id)
    }

    /// First spawn portal, or the first portal, or the origin.
    pub fn default_spawn(&self) -> (u8, Point) {
        self.portals
            .iter()
            .find(|p| p.is_spawn())
            .or_else(|| self.portals.first())
            .map(|p| (p.id, p.position()))
            .unwrap_or((0, Point::default()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NpcData {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MobData {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u8,
    pub max_hp: i32,
    #[serde(default)]
    pub max_mp: i32,
    #[serde(default)]
    pub exp: i32,
}

fn default_level() -> u8 {
    1
}

pub trait MapProvider: Send + Sync {
    fn map(&self, id: i32) -> Option<Arc<MapData>>;
}

pub trait NpcProvider: Send + Sync {
    fn npc(&self, id: i32) -> Option<Arc<NpcData>>;
}

pub trait MobProvider: Send + Sync {
    fn mob(&self, id: i32) -> Option<Arc<MobData>>;
}

#[derive(Debug, Default, Deserialize)]
struct DataFile {
    #[serde(default)]
    maps: Vec<MapData>,
    #[serde(default)]
    npcs: Vec<NpcData>,
    #[serde(default)]
    mobs: Vec<MobData>,
}

/// In-memory provider for all three template kinds.
#[derive(Debug, Default, Clone)]
pub struct StaticMaps {
    maps: HashMap<i32, Arc<MapData>>,
    npcs: HashMap<i32, Arc<NpcData>>,
    mobs: HashMap<i32, Arc<MobData>>,
}

impl StaticMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(mut self, map: MapData) -> Self {
        self.maps.insert(map.id, Arc::new(map));
        self
    }

    pub fn with_npc(mut self, npc: NpcData) -> Self {
        self.npcs.insert(npc.id, Arc::new(npc));
        self
    }

    pub fn with_mob(mut self, mob: MobData) -> Self {
        self.mobs.insert(mob.id, Arc::new(mob));
        self
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: DataFile = toml::from_str(text)
            .map_err(|e| ServerError::ConfigError(format!("Failed to parse map data: {e}")))?;
        let mut data = Self::new();
        for map in file.maps {
            data = data.with_map(map);
        }
        for npc in file.npcs {
            data = data.with_npc(npc);
        }
        for mob in file.mobs {
            data = data.with_mob(mob);
        }
        Ok(data)
    }

    /// Load `maps.toml` from a data directory.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join("maps.toml");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ServerError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let data = Self::from_toml(&text)?;
        info!(path = %path.display(), maps = data.maps.len(), npcs = data.npcs.len(), mobs = data.mobs.len(), "Map data loaded");
        Ok(data)
    }

    /// A small starter world used when no data directory is present.
    pub fn builtin() -> Self {
        Self::new()
            .with_map(MapData {
                id: DEFAULT_MAP_ID,
                name: String::from("Henesys"),
                return_map: DEFAULT_MAP_ID,
                portals: vec![
                    Portal {
                        id: 0,
                        name: String::from("sp"),
                        x: -300,
                        y: 150,
                        target_map: NO_TARGET_MAP,
                        target_portal: String::new(),
                    },
                    Portal {
                        id: 1,
                        name: String::from("east00"),
                        x: 3600,
                        y: 270,
                        target_map: 100_010_000,
                        target_portal: String::from("west00"),
                    },
                ],
                npcs: vec![NpcSpawn {
                    npc_id: 1_012_000,
                    x: 200,
                    y: 150,
                    foothold: 10,
                    rx0: 150,
                    rx1: 250,
                    flip: false,
                }],
                mobs: Vec::new(),
            })
            .with_map(MapData {
                id: 100_010_000,
                name: String::from("Henesys Hunting Ground I"),
                return_map: DEFAULT_MAP_ID,
                portals: vec![
                    Portal {
                        id: 0,
                        name: String::from("sp"),
                        x: 0,
                        y: 200,
                        target_map: NO_TARGET_MAP,
                        target_portal: String::new(),
                    },
                    Portal {
                        id: 1,
                        name: String::from("west00"),
                        x: -1200,
                        y: 200,
                        target_map: DEFAULT_MAP_ID,
                        target_portal: String::from("east00"),
                    },
                ],
                npcs: Vec::new(),
                mobs: vec![
                    MobSpawn {
                        mob_id: 100_100,
                        x: -400,
                        y: 200,
                        foothold: 3,
                        respawn_ms: 5_000,
                    },
                    MobSpawn {
                        mob_id: 100_100,
                        x: 400,
                        y: 200,
                        foothold: 7,
                        respawn_ms: 5_000,
                    },
                ],
            })
            .with_npc(NpcData {
                id: 1_012_000,
                name: String::from("Regular Cab"),
                script: Some(String::from("taxi")),
            })
            .with_mob(MobData {
                id: 100_100,
                name: String::from("Snail"),
                level: 1,
                max_hp: 8,
                max_mp: 0,
                exp: 3,
            })
    }
}

impl MapProvider for StaticMaps {
    fn map(&self, id: i32) -> Option<Arc<MapData>> {
        self.maps.get(&id).cloned()
    }
}

impl NpcProvider for StaticMaps {
    fn npc(&self, id: i32) -> Option<Arc<NpcData>> {
        self.npcs.get(&id).cloned()
    }
}

impl MobProvider for StaticMaps {
    fn mob(&self, id: i32) -> Option<Arc<MobData>> {
        self.mobs.get(&id).cloned()
    }
}
