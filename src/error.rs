//! Error types used by the dungeonvisor engine and its collaborators.
//!
//! This module defines the error enums surfaced by the engine:
//!
//! - [`FormatError`]: a dungeon format was malformed or its load was vetoed.
//! - [`WorldError`]: the world allocator failed to build or destroy a world copy.
//! - [`HostError`]: the host refused to materialize an entity.
//! - [`ConfigError`]: the engine configuration is out of range.
//! - [`CodecError`]: a client payload could not be encoded or decoded.
//! - [`EngineError`]: errors raised by engine operations themselves.
//!
//! All types provide `as_label` (stable snake_case for logs/metrics) and
//! `as_message` helpers.
//!
//! Ordinary outcomes such as an exhausted cache, a locked door or a reclaimed mob
//! are **not** errors; see [`Checkout`](crate::Checkout), [`KeyUse`](crate::KeyUse)
//! and [`Engine::living_handle`](crate::Engine::living_handle).

use thiserror::Error;

use crate::core::{InstanceId, InstanceState};
use crate::host::PlayerId;

/// # Errors produced while loading a dungeon format.
///
/// A format that fails with any of these is rejected in full: nothing of it
/// enters the catalog.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The document is not valid JSON or does not match the format shape.
    #[error("malformed format document: {reason}")]
    Parse {
        /// Parser diagnostic.
        reason: String,
    },

    /// The format identifier is empty.
    #[error("format identifier is empty")]
    EmptyId,

    /// The schematic reference is empty.
    #[error("format '{format}' has no schematic reference")]
    EmptySchematic { format: String },

    /// The format defines no rooms.
    #[error("format '{format}' defines no rooms")]
    NoRooms { format: String },

    /// Two rooms share the same identifier.
    #[error("format '{format}' defines room '{room}' twice")]
    DuplicateRoom { format: String, room: String },

    /// Two doors share the same identifier.
    #[error("format '{format}' defines door '{door}' twice")]
    DuplicateDoor { format: String, door: String },

    /// A room exit points at a room that does not exist.
    #[error("format '{format}': room '{room}' exits to unknown room '{exit}'")]
    UnknownExit {
        format: String,
        room: String,
        exit: String,
    },

    /// A room cannot be reached from the entry room.
    #[error("format '{format}': room '{room}' is not connected to the room graph")]
    Disconnected { format: String, room: String },

    /// The room graph loops but the format does not allow loops.
    #[error("format '{format}': room graph loops through '{room}' and loops are not allowed")]
    Cycle { format: String, room: String },

    /// A door is placed in a room that does not exist.
    #[error("format '{format}': door '{door}' references unknown room '{room}'")]
    DoorRoom {
        format: String,
        door: String,
        room: String,
    },

    /// A door needs more keys than the format can ever drop.
    #[error("format '{format}': door '{door}' needs {required} keys but only {available} can drop")]
    KeyPool {
        format: String,
        door: String,
        required: u32,
        available: u32,
    },

    /// A mob spawn names an entity kind the host cannot resolve.
    #[error("format '{format}': room '{room}' spawns unknown entity kind '{kind}'")]
    UnknownEntityKind {
        format: String,
        room: String,
        kind: String,
    },

    /// A mob spawn definition has a zero count.
    #[error("format '{format}': room '{room}' spawns zero '{kind}'")]
    ZeroCount {
        format: String,
        room: String,
        kind: String,
    },

    /// A room's bounding box has `max` below `min` on some axis.
    #[error("format '{format}': room '{room}' has inverted bounds")]
    InvertedBounds { format: String, room: String },

    /// A mob spawn radius is negative or not finite.
    #[error("format '{format}': room '{room}' spreads '{kind}' over an invalid radius")]
    BadRadius {
        format: String,
        room: String,
        kind: String,
    },

    /// A room spawns more entities than one population pass allows.
    #[error("format '{format}': room '{room}' spawns {count} mobs, limit is {limit}")]
    TooManyMobs {
        format: String,
        room: String,
        count: u32,
        limit: u32,
    },

    /// A load interceptor vetoed the format.
    #[error("format '{format}' load was cancelled")]
    Cancelled { format: String },
}

impl FormatError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use dungeonvisor::FormatError;
    ///
    /// let err = FormatError::NoRooms { format: "sewer-1".into() };
    /// assert_eq!(err.as_label(), "format_no_rooms");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FormatError::Parse { .. } => "format_parse",
            FormatError::EmptyId => "format_empty_id",
            FormatError::EmptySchematic { .. } => "format_empty_schematic",
            FormatError::NoRooms { .. } => "format_no_rooms",
            FormatError::DuplicateRoom { .. } => "format_duplicate_room",
            FormatError::DuplicateDoor { .. } => "format_duplicate_door",
            FormatError::UnknownExit { .. } => "format_unknown_exit",
            FormatError::Disconnected { .. } => "format_disconnected",
            FormatError::Cycle { .. } => "format_cycle",
            FormatError::DoorRoom { .. } => "format_door_room",
            FormatError::KeyPool { .. } => "format_key_pool",
            FormatError::UnknownEntityKind { .. } => "format_unknown_entity_kind",
            FormatError::ZeroCount { .. } => "format_zero_count",
            FormatError::InvertedBounds { .. } => "format_inverted_bounds",
            FormatError::BadRadius { .. } => "format_bad_radius",
            FormatError::TooManyMobs { .. } => "format_too_many_mobs",
            FormatError::Cancelled { .. } => "format_cancelled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }

    /// Identifier of the rejected format, when it is known.
    pub fn format_id(&self) -> Option<&str> {
        match self {
            FormatError::Parse { .. } | FormatError::EmptyId => None,
            FormatError::EmptySchematic { format }
            | FormatError::NoRooms { format }
            | FormatError::DuplicateRoom { format, .. }
            | FormatError::DuplicateDoor { format, .. }
            | FormatError::UnknownExit { format, .. }
            | FormatError::Disconnected { format, .. }
            | FormatError::Cycle { format, .. }
            | FormatError::DoorRoom { format, .. }
            | FormatError::KeyPool { format, .. }
            | FormatError::UnknownEntityKind { format, .. }
            | FormatError::ZeroCount { format, .. }
            | FormatError::InvertedBounds { format, .. }
            | FormatError::BadRadius { format, .. }
            | FormatError::TooManyMobs { format, .. }
            | FormatError::Cancelled { format } => Some(format),
        }
    }
}

impl From<serde_json::Error> for FormatError {
    fn from(e: serde_json::Error) -> Self {
        FormatError::Parse {
            reason: e.to_string(),
        }
    }
}

/// # Errors produced by a [`WorldAllocator`](crate::WorldAllocator).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// Copying or generating the world for a format failed.
    #[error("world build failed for format '{format}': {reason}")]
    Build { format: String, reason: String },

    /// Deleting a world copy failed.
    #[error("world destroy failed for '{world}': {reason}")]
    Destroy { world: String, reason: String },
}

impl WorldError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorldError::Build { .. } => "world_build",
            WorldError::Destroy { .. } => "world_destroy",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            WorldError::Build { format, reason } => format!("build {format}: {reason}"),
            WorldError::Destroy { world, reason } => format!("destroy {world}: {reason}"),
        }
    }
}

/// # Errors produced by a [`Host`](crate::Host).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host does not know how to spawn this kind.
    #[error("unknown entity kind '{kind}'")]
    UnknownKind { kind: String },

    /// The host refused the spawn (chunk unloaded, world gone, ...).
    #[error("spawn of '{kind}' refused: {reason}")]
    Refused { kind: String, reason: String },
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::UnknownKind { .. } => "host_unknown_kind",
            HostError::Refused { .. } => "host_refused",
        }
    }
}

/// # Errors produced by [`Config::validate`](crate::Config::validate).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The per-format cache size is at or above the supported limit.
    #[error("cache_size {size} must be below {limit}")]
    CacheSizeTooLarge { size: usize, limit: usize },

    /// Instances would be pasted on top of each other.
    #[error("grid_size must be positive")]
    ZeroGridSize,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::CacheSizeTooLarge { .. } => "config_cache_size",
            ConfigError::ZeroGridSize => "config_grid_size",
        }
    }
}

/// # Errors produced by a [`Codec`](crate::Codec).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed on '{channel}': {reason}")]
    Encode { channel: String, reason: String },

    #[error("decode failed on '{channel}': {reason}")]
    Decode { channel: String, reason: String },
}

impl CodecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::Encode { .. } => "codec_encode",
            CodecError::Decode { .. } => "codec_decode",
        }
    }
}

/// # Errors produced by engine operations.
///
/// These represent caller mistakes (unknown ids, wrong execution context) and
/// terminal failures of the operation that was requested.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// No format with this identifier is loaded.
    #[error("format '{format}' not found")]
    FormatNotFound { format: String },

    /// The instance is unknown or already disposed.
    #[error("instance {instance} not found")]
    InstanceNotFound { instance: InstanceId },

    /// The instance's format has no such room.
    #[error("room '{room}' not found")]
    RoomNotFound { room: String },

    /// The room has not been populated yet, or is already complete.
    #[error("room '{room}' is not accepting spawns")]
    RoomNotPopulated { room: String },

    /// The instance has no such door.
    #[error("door '{door}' not found")]
    DoorNotFound { door: String },

    /// The player is not assigned to the instance.
    #[error("player {player} is not part of the instance")]
    PlayerNotInInstance { player: PlayerId },

    /// Checkout was requested with an empty party.
    #[error("checkout requires at least one player")]
    NoPlayers,

    /// A primary-only operation was called from another thread.
    #[error("'{op}' must run on the primary context")]
    WrongContext { op: &'static str },

    /// The primary context driver was dropped.
    #[error("primary context is closed")]
    PrimaryClosed,

    /// The instance is not in a state that allows the operation.
    #[error("instance {instance} is {state:?}")]
    InvalidState {
        instance: InstanceId,
        state: InstanceState,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use dungeonvisor::EngineError;
    ///
    /// let err = EngineError::WrongContext { op: "entity_died" };
    /// assert_eq!(err.as_label(), "engine_wrong_context");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::FormatNotFound { .. } => "engine_format_not_found",
            EngineError::InstanceNotFound { .. } => "engine_instance_not_found",
            EngineError::RoomNotFound { .. } => "engine_room_not_found",
            EngineError::RoomNotPopulated { .. } => "engine_room_not_populated",
            EngineError::DoorNotFound { .. } => "engine_door_not_found",
            EngineError::PlayerNotInInstance { .. } => "engine_player_not_in_instance",
            EngineError::NoPlayers => "engine_no_players",
            EngineError::WrongContext { .. } => "engine_wrong_context",
            EngineError::PrimaryClosed => "engine_primary_closed",
            EngineError::InvalidState { .. } => "engine_invalid_state",
            EngineError::Format(e) => e.as_label(),
            EngineError::World(e) => e.as_label(),
            EngineError::Config(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}
