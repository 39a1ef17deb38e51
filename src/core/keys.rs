//! # Door keys.
//!
//! Keys drop into the world (room clears, marked mob kills, host calls),
//! are collected into the instance-wide counter and open doors by threshold:
//!
//! ```text
//! drop_key ──► pending ──(Immediate | Delayed timer | pickup_key)──► collected
//!                                                                      │
//!                                    use_key(door): collected ≥ required? ──► unlocked
//! ```
//!
//! ## Rules
//! - `collected` never decreases while the instance is active and never exceeds `dropped`.
//! - Keys are a threshold, not a currency: opening a door does not consume them.
//! - An unlocked door stays unlocked.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::EngineError;
use crate::events::{Event, EventKind};
use crate::format::DoorDef;
use crate::host::PlayerId;
use crate::world::Location;

use super::config::KeyPickup;
use super::engine::{ensure_active, Engine};
use super::instance::{Instance, InstanceState};

/// Runtime state of one door.
pub(crate) struct DoorComponent {
    pub(crate) id: Arc<str>,
    pub(crate) location: Location,
    pub(crate) required: u32,
    pub(crate) unlocked: bool,
}

impl DoorComponent {
    pub(crate) fn new(def: &DoorDef, location: Location) -> Self {
        Self {
            id: Arc::from(def.id.as_str()),
            location,
            required: def.required_keys,
            unlocked: false,
        }
    }
}

/// Outcome of [`Engine::use_key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyUse {
    /// The door opened now.
    Unlocked,
    AlreadyUnlocked,
    /// Not enough keys collected yet.
    InsufficientKeys { have: u32, need: u32 },
}

impl KeyUse {
    pub fn as_label(&self) -> &'static str {
        match self {
            KeyUse::Unlocked => "unlocked",
            KeyUse::AlreadyUnlocked => "already_unlocked",
            KeyUse::InsufficientKeys { .. } => "insufficient_keys",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, KeyUse::Unlocked | KeyUse::AlreadyUnlocked)
    }
}

/// Outcome of [`Engine::pickup_key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pickup {
    /// One key collected; `keys` is the new total.
    PickedUp { keys: u32 },
    NothingToPickUp,
}

/// Per-instance key accounting.
#[derive(Debug, Default)]
pub(crate) struct KeyLedger {
    collected: u32,
    dropped: u32,
    /// Tickets of dropped, uncollected keys, oldest first.
    pending: VecDeque<u64>,
    next: u64,
}

impl KeyLedger {
    pub(crate) fn collected(&self) -> u32 {
        self.collected
    }

    pub(crate) fn dropped(&self) -> u32 {
        self.dropped
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Records a dropped key and returns its ticket.
    pub(crate) fn drop_key(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        self.dropped += 1;
        self.pending.push_back(id);
        id
    }

    /// Collects the oldest pending key.
    pub(crate) fn collect_next(&mut self) -> Option<u32> {
        self.pending.pop_front()?;
        self.collected += 1;
        Some(self.collected)
    }

    /// Collects a specific key if nobody picked it up yet.
    pub(crate) fn collect(&mut self, id: u64) -> Option<u32> {
        let pos = self.pending.iter().position(|&k| k == id)?;
        self.pending.remove(pos);
        self.collected += 1;
        Some(self.collected)
    }

    pub(crate) fn try_unlock(&self, door: &mut DoorComponent) -> KeyUse {
        if door.unlocked {
            return KeyUse::AlreadyUnlocked;
        }
        if self.collected < door.required {
            return KeyUse::InsufficientKeys {
                have: self.collected,
                need: door.required,
            };
        }
        door.unlocked = true;
        KeyUse::Unlocked
    }
}

impl Engine {
    /// Drops one key at `at` and returns the collected count at drop time.
    ///
    /// Under [`KeyPickup::Immediate`] the key is collected before this returns;
    /// under [`KeyPickup::Delayed`] a timer collects it unless a player did first.
    pub fn drop_key(&self, instance: &Arc<Instance>, at: Location) -> Result<u32, EngineError> {
        ensure_active(instance)?;
        let (ticket, keys, players) = {
            let mut inner = instance.inner.lock();
            let ticket = inner.keys.drop_key();
            (ticket, inner.keys.collected(), inner.players.clone())
        };

        self.bus.publish(
            Event::new(EventKind::KeyDropped)
                .with_instance(instance.id(), instance.format_id())
                .with_location(at)
                .with_keys(keys)
                .with_players(&players),
        );

        match self.cfg.key_pickup {
            KeyPickup::Immediate => {
                self.collect_key(instance, Some(ticket), None);
            }
            KeyPickup::Delayed { .. } => self.schedule_collect(instance, ticket),
            KeyPickup::Manual => {}
        }
        Ok(keys)
    }

    /// Collects the oldest pending key on behalf of `player`.
    pub fn pickup_key(&self, instance: &Arc<Instance>, player: PlayerId) -> Result<Pickup, EngineError> {
        ensure_active(instance)?;
        if !instance.has_player(player) {
            return Err(EngineError::PlayerNotInInstance { player });
        }

        if let Some(keys) = self.collect_key(instance, None, Some(player)) {
            return Ok(Pickup::PickedUp { keys });
        }
        self.bus.publish(
            Event::new(EventKind::KeyPickedUp)
                .with_instance(instance.id(), instance.format_id())
                .with_player(player)
                .with_keys(instance.door_keys())
                .with_reason("empty"),
        );
        Ok(Pickup::NothingToPickUp)
    }

    /// Tries to open `door` with the instance's collected keys.
    pub fn use_key(&self, instance: &Arc<Instance>, door: &str) -> Result<KeyUse, EngineError> {
        ensure_active(instance)?;
        let (outcome, keys, players) = {
            let mut guard = instance.inner.lock();
            let inner = &mut *guard;
            let component = inner
                .doors
                .iter_mut()
                .find(|d| &*d.id == door)
                .ok_or_else(|| EngineError::DoorNotFound { door: door.to_string() })?;
            let outcome = inner.keys.try_unlock(component);
            (outcome, inner.keys.collected(), inner.players.clone())
        };

        tracing::debug!(instance = %instance.id(), door, outcome = outcome.as_label(), "key used");
        self.bus.publish(
            Event::new(EventKind::KeyUsed)
                .with_instance(instance.id(), instance.format_id())
                .with_door(door)
                .with_keys(keys)
                .with_players(&players)
                .with_reason(outcome.as_label()),
        );
        Ok(outcome)
    }

    /// Moves a pending key into the counter and announces it.
    fn collect_key(
        &self,
        instance: &Arc<Instance>,
        ticket: Option<u64>,
        player: Option<PlayerId>,
    ) -> Option<u32> {
        let (keys, players) = {
            let mut inner = instance.inner.lock();
            let keys = match ticket {
                Some(id) => inner.keys.collect(id),
                None => inner.keys.collect_next(),
            }?;
            (keys, inner.players.clone())
        };

        let mut ev = Event::new(EventKind::KeyPickedUp)
            .with_instance(instance.id(), instance.format_id())
            .with_keys(keys)
            .with_players(&players);
        if let Some(player) = player {
            ev = ev.with_player(player);
        }
        self.bus.publish(ev);
        Some(keys)
    }

    fn schedule_collect(&self, instance: &Arc<Instance>, ticket: u64) {
        let (Some(delay), Some(engine)) = (self.cfg.key_pickup.delay(), self.this.upgrade()) else {
            return;
        };
        let instance = Arc::clone(instance);
        let token = self.token.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if instance.state() == InstanceState::Active {
                            engine.collect_key(&instance, Some(ticket), None);
                        }
                    }
                }
            },
            &self.rt,
        );
    }
}
