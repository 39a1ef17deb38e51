//! # Instance: one isolated run of a format.
//!
//! The lifecycle state is a single atomic so that checkout can claim a cached
//! instance with one compare-and-swap; everything else lives behind the
//! instance's own mutex.
//!
//! ```text
//!             build ok      CacheReady ok         checkout CAS        Start ok
//! (new) Uncached ─────────────────────► Cached ─────────────► Activating ─────► Active
//!    ▲  │ CacheReady cancelled             ▲   Start cancelled    │                 │ all required rooms
//!    └──┘ (retried by ensure_warm)         └──────────────────────┘                 │ complete + TotalCompletion ok
//!                                                                                   ▼
//!                                 Disposed ◄── world released ── Completing ◄───────┘
//!
//! any non-terminal ──(build/destroy failure)──► Failed
//! ```
//!
//! ## Rules
//! - `Disposed` and `Failed` are terminal.
//! - Release of resources happens once per instance, whatever the state.
//! - The mutex is never held while interceptors run or while engine maps are locked.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::format::Format;
use crate::host::{EntityId, PlayerId};
use crate::world::{Location, WorldHandle};

use super::keys::{DoorComponent, KeyLedger};
use super::room::{RoomInstance, RoomState};

/// Unique instance identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstanceState {
    /// Allocated; world built or building, not yet offered.
    Uncached = 0,
    /// Pooled and ready for checkout.
    Cached = 1,
    /// Claimed by one checkout; activation is in progress.
    Activating = 2,
    /// Players are running it.
    Active = 3,
    /// Winding down; world release in flight.
    Completing = 4,
    Disposed = 5,
    Failed = 6,
}

impl InstanceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => InstanceState::Uncached,
            1 => InstanceState::Cached,
            2 => InstanceState::Activating,
            3 => InstanceState::Active,
            4 => InstanceState::Completing,
            5 => InstanceState::Disposed,
            _ => InstanceState::Failed,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Disposed | InstanceState::Failed)
    }

    pub fn as_label(self) -> &'static str {
        match self {
            InstanceState::Uncached => "uncached",
            InstanceState::Cached => "cached",
            InstanceState::Activating => "activating",
            InstanceState::Active => "active",
            InstanceState::Completing => "completing",
            InstanceState::Disposed => "disposed",
            InstanceState::Failed => "failed",
        }
    }
}

/// Why an instance was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Every required room was cleared.
    Completed,
    /// The last player left.
    NoPlayersLeft,
    /// Its format was replaced in the catalog.
    FormatChange,
    Shutdown,
    /// The world could not be built.
    BuildFailed,
    /// Requested through [`Engine::dispose`](crate::Engine::dispose).
    Explicit,
}

impl RemovalReason {
    pub fn as_label(self) -> &'static str {
        match self {
            RemovalReason::Completed => "completed",
            RemovalReason::NoPlayersLeft => "no_players_left",
            RemovalReason::FormatChange => "format_change",
            RemovalReason::Shutdown => "shutdown",
            RemovalReason::BuildFailed => "build_failed",
            RemovalReason::Explicit => "explicit",
        }
    }
}

/// Mutable state of an instance.
pub(crate) struct InstanceInner {
    pub(crate) world: Option<WorldHandle>,
    pub(crate) players: Vec<PlayerId>,
    /// Room each player was last seen in.
    pub(crate) positions: HashMap<PlayerId, usize>,
    pub(crate) rooms: Vec<RoomInstance>,
    pub(crate) doors: Vec<DoorComponent>,
    pub(crate) keys: KeyLedger,
}

impl InstanceInner {
    pub(crate) fn room_index(&self, room: &str) -> Option<usize> {
        self.rooms.iter().position(|r| &*r.id == room)
    }

    pub(crate) fn required_complete(&self, format: &Format) -> bool {
        self.rooms
            .iter()
            .zip(&format.rooms)
            .filter(|(_, template)| template.required)
            .all(|(room, _)| room.state == RoomState::Complete)
    }

    /// Drains every tracked entity out of every room.
    pub(crate) fn take_entities(&mut self) -> Vec<EntityId> {
        self.rooms
            .iter_mut()
            .flat_map(|r| r.alive.drain().map(|(e, _)| e))
            .collect()
    }
}

/// One dungeon run.
pub struct Instance {
    id: InstanceId,
    format: Arc<Format>,
    origin: Location,
    slot: usize,
    state: AtomicU8,
    released: AtomicBool,
    pub(crate) inner: Mutex<InstanceInner>,
}

impl Instance {
    /// Wires rooms and doors dormant around `origin`.
    pub(crate) fn new(format: Arc<Format>, slot: usize, origin: Location) -> Self {
        let rooms = format
            .rooms
            .iter()
            .map(|t| RoomInstance::new(Arc::from(t.id.as_str())))
            .collect();
        let doors = format
            .doors
            .iter()
            .map(|d| {
                let room_origin = format.room(&d.room).map_or(Location::ORIGIN, |r| r.origin);
                DoorComponent::new(d, origin + room_origin + d.offset)
            })
            .collect();

        Self {
            id: InstanceId::new(),
            format,
            origin,
            slot,
            state: AtomicU8::new(InstanceState::Uncached as u8),
            released: AtomicBool::new(false),
            inner: Mutex::new(InstanceInner {
                world: None,
                players: Vec::new(),
                positions: HashMap::new(),
                rooms,
                doors,
                keys: KeyLedger::default(),
            }),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn format(&self) -> &Arc<Format> {
        &self.format
    }

    pub fn format_id(&self) -> &str {
        &self.format.id
    }

    /// Paste origin.
    pub fn origin(&self) -> Location {
        self.origin
    }

    /// Absolute player spawn point.
    pub fn spawn_point(&self) -> Location {
        self.origin + self.format.spawn
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Single compare-and-swap from `from` to `to`.
    pub(crate) fn transition(&self, from: InstanceState, to: InstanceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `to` from any non-terminal state other than `to` itself.
    pub(crate) fn advance_to(&self, to: InstanceState) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let from = InstanceState::from_u8(cur);
            if from.is_terminal() || from == to {
                return false;
            }
            match self
                .state
                .compare_exchange(cur, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// First caller wins the right to release resources.
    pub(crate) fn begin_release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn attach_world(&self, world: WorldHandle) {
        self.inner.lock().world = Some(world);
    }

    pub fn world(&self) -> Option<WorldHandle> {
        self.inner.lock().world.clone()
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.inner.lock().players.clone()
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.inner.lock().players.contains(&player)
    }

    /// Keys collected so far.
    pub fn door_keys(&self) -> u32 {
        self.inner.lock().keys.collected()
    }

    /// Keys ever dropped.
    pub fn keys_dropped(&self) -> u32 {
        self.inner.lock().keys.dropped()
    }

    /// Dropped keys nobody collected yet.
    pub fn pending_keys(&self) -> usize {
        self.inner.lock().keys.pending()
    }

    pub fn room_state(&self, room: &str) -> Option<RoomState> {
        let inner = self.inner.lock();
        inner.room_index(room).map(|i| inner.rooms[i].state)
    }

    /// Entities currently tracked as alive in `room`, sorted.
    pub fn alive_mobs(&self, room: &str) -> Option<Vec<EntityId>> {
        let inner = self.inner.lock();
        let idx = inner.room_index(room)?;
        let mut mobs: Vec<EntityId> = inner.rooms[idx].alive.keys().copied().collect();
        mobs.sort_unstable();
        Some(mobs)
    }

    pub fn completed_rooms(&self) -> usize {
        self.inner
            .lock()
            .rooms
            .iter()
            .filter(|r| r.state == RoomState::Complete)
            .count()
    }

    pub fn door_unlocked(&self, door: &str) -> Option<bool> {
        self.inner
            .lock()
            .doors
            .iter()
            .find(|d| &*d.id == door)
            .map(|d| d.unlocked)
    }

    /// Absolute location of a door block.
    pub fn door_location(&self, door: &str) -> Option<Location> {
        self.inner
            .lock()
            .doors
            .iter()
            .find(|d| &*d.id == door)
            .map(|d| d.location)
    }

    /// Room whose bounds contain `at`, in document order.
    pub fn room_at(&self, at: Location) -> Option<&str> {
        let rel = at - self.origin;
        self.format
            .rooms
            .iter()
            .find(|r| r.bounds.is_some_and(|b| b.contains(rel - r.origin)))
            .map(|r| r.id.as_str())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("format", &self.format.id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    fn fresh() -> Instance {
        Instance::new(testkit::sewer_format(), 0, Location::new(1000.0, 0.0, 0.0))
    }

    #[test]
    fn test_new_instance_is_uncached_and_empty() {
        let inst = fresh();
        assert_eq!(inst.state(), InstanceState::Uncached);
        assert!(inst.players().is_empty());
        assert_eq!(inst.completed_rooms(), 0);
        assert_eq!(inst.room_state("a"), Some(RoomState::Dormant));
        assert_eq!(inst.door_unlocked("gate"), Some(false));
        assert_eq!(inst.door_keys(), 0);
    }

    #[test]
    fn test_transition_is_exclusive() {
        let inst = fresh();
        assert!(inst.transition(InstanceState::Uncached, InstanceState::Cached));
        assert!(inst.transition(InstanceState::Cached, InstanceState::Activating));
        assert!(
            !inst.transition(InstanceState::Cached, InstanceState::Activating),
            "a claimed instance cannot be claimed twice"
        );
    }

    #[test]
    fn test_terminal_states_stick() {
        let inst = fresh();
        assert!(inst.advance_to(InstanceState::Failed));
        assert!(!inst.advance_to(InstanceState::Completing));
        assert_eq!(inst.state(), InstanceState::Failed);
    }

    #[test]
    fn test_release_happens_once() {
        let inst = fresh();
        assert!(inst.begin_release());
        assert!(!inst.begin_release());
        assert!(inst.is_released());
    }

    #[test]
    fn test_room_at_uses_bounds_relative_to_origin() {
        let inst = fresh();
        assert_eq!(inst.room_at(Location::new(1005.0, 1.0, 5.0)), Some("a"));
        assert_eq!(inst.room_at(Location::new(1025.0, 1.0, 5.0)), Some("b"));
        assert_eq!(inst.room_at(Location::new(5.0, 1.0, 5.0)), None);
    }

    #[test]
    fn test_door_location_is_absolute() {
        let inst = fresh();
        assert_eq!(
            inst.door_location("gate"),
            Some(Location::new(1019.0, 1.0, 5.0))
        );
    }
}
