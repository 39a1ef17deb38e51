//! # Format data model.
//!
//! A [`Format`] is the immutable template every instance is built from. It is
//! deserialized straight from the format document and shared as `Arc<Format>`
//! by the catalog and by every instance built from it, so a replaced format
//! stays alive until its last instance is gone.
//!
//! Positions inside a format are **relative**:
//! ```text
//! instance origin ─► + room.origin ─► + mob.offset (+ spread)   = mob spawn
//!                                  └► + door.offset             = door block
//!                                  └► bounds (min..max)         = room area
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::world::{Bounds, Location};

/// How a room hands out door keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDropMode {
    /// Keys only come from scripted [`Engine::drop_key`](crate::Engine::drop_key) calls.
    #[default]
    None,
    /// Every marked mob drops one key where it dies.
    MarkedMobKill,
    /// The last mob killed in the room drops one key.
    RoomClear,
}

/// One mob spawn line: `count` entities of `kind` around `offset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MobSpawnDef {
    pub kind: String,
    #[serde(default)]
    pub offset: Location,
    #[serde(default = "one")]
    pub count: u32,
    /// Horizontal spread radius around `offset` (0 = exact position).
    #[serde(default)]
    pub radius: f64,
    /// Marked mobs drop keys in [`KeyDropMode::MarkedMobKill`] rooms.
    #[serde(default)]
    pub marked: bool,
    /// Free-form properties handed to the host on spawn.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// A room template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomTemplate {
    pub id: String,
    #[serde(default)]
    pub origin: Location,
    /// Area of the room relative to `origin`; rooms without bounds are never
    /// resolved from a player position.
    #[serde(default)]
    pub bounds: Option<Bounds>,
    /// Directed edges of the room graph.
    #[serde(default)]
    pub exits: Vec<String>,
    /// Whether the room must be cleared to complete the dungeon.
    #[serde(default = "yes")]
    pub required: bool,
    #[serde(default)]
    pub key_drop: KeyDropMode,
    #[serde(default)]
    pub mobs: Vec<MobSpawnDef>,
}

impl RoomTemplate {
    /// Most entities a single room may spawn.
    pub const MOB_LIMIT: u32 = 1024;

    /// Total number of entities this room spawns, saturating at `u32::MAX`.
    pub fn mob_count(&self) -> u32 {
        self.mobs.iter().map(|m| m.count).fold(0, u32::saturating_add)
    }

    /// Keys this room can drop through its [`KeyDropMode`].
    pub fn key_capacity(&self) -> u32 {
        match self.key_drop {
            KeyDropMode::None => 0,
            KeyDropMode::MarkedMobKill => self
                .mobs
                .iter()
                .filter(|m| m.marked)
                .map(|m| m.count)
                .fold(0, u32::saturating_add),
            KeyDropMode::RoomClear => u32::from(self.mob_count() > 0),
        }
    }
}

/// A key-gated door.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoorDef {
    pub id: String,
    pub room: String,
    #[serde(default)]
    pub offset: Location,
    pub required_keys: u32,
}

/// Immutable dungeon template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub id: String,
    /// Schematic reference understood by the world allocator.
    pub schematic: String,
    /// Player spawn, relative to the instance origin.
    #[serde(default)]
    pub spawn: Location,
    /// Rooms in document order; the first one is the entry room.
    #[serde(default)]
    pub rooms: Vec<RoomTemplate>,
    #[serde(default)]
    pub doors: Vec<DoorDef>,
    /// Allow directed cycles in the room graph.
    #[serde(default)]
    pub allow_loops: bool,
    /// Keys scripts may drop on top of the rooms' key drops.
    #[serde(default)]
    pub bonus_keys: u32,
}

impl Format {
    pub fn room(&self, id: &str) -> Option<&RoomTemplate> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn room_index(&self, id: &str) -> Option<usize> {
        self.rooms.iter().position(|r| r.id == id)
    }

    pub fn door(&self, id: &str) -> Option<&DoorDef> {
        self.doors.iter().find(|d| d.id == id)
    }

    /// Upper bound of keys an instance of this format can ever collect.
    pub fn key_capacity(&self) -> u32 {
        self.rooms
            .iter()
            .map(RoomTemplate::key_capacity)
            .fold(self.bonus_keys, u32::saturating_add)
    }
}
