//! # Engine events published on the bus.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Catalog events**: format load and rejection
//! - **Instance lifecycle events**: cache-ready, start, completion, disposal, failure
//! - **Progression events**: rooms, mobs, keys and doors inside an instance
//! - **Subscriber events**: overflow and panic in subscriber workers
//!
//! Events are plain data. Cancellable and mutable notifications live in
//! [`hooks`](crate::hooks); by the time an event is published the transition it
//! describes has already happened.
//!
//! ## Snapshots
//! `keys`, `players` and `location` are copied into the event when it is built;
//! later changes to the instance never alter an event already published.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use dungeonvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::KeyDropped)
//!     .with_format("sewer-1")
//!     .with_keys(1);
//!
//! assert_eq!(ev.kind, EventKind::KeyDropped);
//! assert_eq!(ev.keys, Some(1));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::InstanceId;
use crate::host::{EntityId, PlayerId};
use crate::world::Location;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Catalog events ===
    /// Format validated and registered.
    ///
    /// Sets:
    /// - `format`: format id
    FormatLoaded,

    /// Format rejected; nothing was registered.
    ///
    /// Sets:
    /// - `format`: format id (when known)
    /// - `reason`: error label
    FormatRejected,

    /// Format taken out of the catalog; its instances are being disposed.
    ///
    /// Sets:
    /// - `format`: format id
    FormatRemoved,

    // === Instance lifecycle events ===
    /// Instance reached `Cached`.
    ///
    /// Sets:
    /// - `format`, `instance`
    /// - `location`: paste origin
    CacheReady,

    /// Instance was checked out and is now `Active`.
    ///
    /// Sets:
    /// - `format`, `instance`
    /// - `location`: paste origin
    /// - `players`: assigned party
    Start,

    /// Checkout found no cached instance.
    ///
    /// Sets:
    /// - `format`
    /// - `players`: requesting party
    CheckoutExhausted,

    /// Every required room is complete; the instance is `Completing`.
    ///
    /// Sets:
    /// - `format`, `instance`, `players`
    TotalCompletion,

    /// Instance resources were released.
    ///
    /// Sets:
    /// - `format`, `instance`
    /// - `reason`: removal reason label
    InstanceDisposed,

    /// Instance moved to `Failed`.
    ///
    /// Sets:
    /// - `format`, `instance`
    /// - `reason`: failure message
    InstanceFailed,

    /// An interceptor vetoed a transition; state is unchanged.
    ///
    /// Sets:
    /// - `format`, `instance` (when one exists)
    /// - `room`: for room completion and mob spawn
    /// - `reason`: transition name (`cache_ready`, `start`, `room_completion`, ...)
    TransitionCancelled,

    // === Progression events ===
    /// A player entered a room.
    ///
    /// Sets:
    /// - `format`, `instance`, `room`
    /// - `player`
    RoomPlayerEnter,

    /// Room left `Dormant`.
    ///
    /// Sets:
    /// - `format`, `instance`, `room`
    /// - `count`: entities spawned
    RoomPopulated,

    /// Room reached `Complete`.
    ///
    /// Sets:
    /// - `format`, `instance`, `room`, `players`
    RoomCompleted,

    /// A mob materialized.
    ///
    /// Sets:
    /// - `format`, `instance`, `room`
    /// - `entity`, `entity_kind`, `location`
    MobSpawned,

    /// A tracked mob left its room's alive set.
    ///
    /// Sets:
    /// - `format`, `instance`, `room`
    /// - `entity`, `location`
    /// - `reason`: `killed` or `reclaimed`
    MobKilled,

    /// A key dropped into the instance.
    ///
    /// Sets:
    /// - `format`, `instance`, `players`
    /// - `location`
    /// - `keys`: collected key count at the time of the drop
    KeyDropped,

    /// A pickup was attempted.
    ///
    /// Sets:
    /// - `format`, `instance`, `players`
    /// - `player`: picker (absent for automatic collection)
    /// - `keys`: collected key count after the call
    /// - `reason`: `empty` when there was nothing to pick up
    KeyPickedUp,

    /// A door was tried with the current keys.
    ///
    /// Sets:
    /// - `format`, `instance`, `players`, `door`
    /// - `keys`: collected key count at the time of the call
    /// - `reason`: outcome label (`unlocked`, `already_unlocked`, `insufficient_keys`)
    KeyUsed,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,
}

/// Engine event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    pub format: Option<Arc<str>>,
    pub instance: Option<InstanceId>,
    pub room: Option<Arc<str>>,
    pub door: Option<Arc<str>>,
    pub player: Option<PlayerId>,
    pub players: Option<Arc<[PlayerId]>>,
    pub location: Option<Location>,
    /// Collected key count snapshot.
    pub keys: Option<u32>,
    /// Generic counter (spawned entities for `RoomPopulated`).
    pub count: Option<u32>,
    pub entity: Option<EntityId>,
    pub entity_kind: Option<Arc<str>>,
    /// Subscriber name for subscriber events.
    pub subscriber: Option<&'static str>,
    /// Human-readable reason or outcome label.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            format: None,
            instance: None,
            room: None,
            door: None,
            player: None,
            players: None,
            location: None,
            keys: None,
            count: None,
            entity: None,
            entity_kind: None,
            subscriber: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_format(mut self, format: impl Into<Arc<str>>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Attaches instance id and its format id.
    #[inline]
    pub fn with_instance(mut self, instance: InstanceId, format: &str) -> Self {
        self.instance = Some(instance);
        self.format = Some(Arc::from(format));
        self
    }

    #[inline]
    pub fn with_room(mut self, room: impl Into<Arc<str>>) -> Self {
        self.room = Some(room.into());
        self
    }

    #[inline]
    pub fn with_door(mut self, door: impl Into<Arc<str>>) -> Self {
        self.door = Some(door.into());
        self
    }

    #[inline]
    pub fn with_player(mut self, player: PlayerId) -> Self {
        self.player = Some(player);
        self
    }

    /// Attaches a copy of the party.
    #[inline]
    pub fn with_players(mut self, players: &[PlayerId]) -> Self {
        self.players = Some(Arc::from(players));
        self
    }

    #[inline]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[inline]
    pub fn with_keys(mut self, keys: u32) -> Self {
        self.keys = Some(keys);
        self
    }

    #[inline]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[inline]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    #[inline]
    pub fn with_entity_kind(mut self, kind: impl Into<Arc<str>>) -> Self {
        self.entity_kind = Some(kind.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// True for events raised by the subscriber machinery itself.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
