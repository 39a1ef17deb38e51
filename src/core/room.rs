//! # Room progression.
//!
//! Each room of an active instance walks one way through three states:
//! ```text
//! Dormant ──(first entry, or activation)──► Populated ──(alive set empty + RoomCompletion ok)──► Complete
//!                                               │  ▲
//!                                               └──┘ RoomCompletion cancelled (retry: Engine::reevaluate)
//! ```
//!
//! ## Rules
//! - `Complete` is only reachable from `Populated` and is never left.
//! - A room whose spawns all came to nothing (no definitions, cancelled or
//!   refused spawns) is complete as soon as it is populated.
//! - Every required room complete ⇒ the instance attempts `Active → Completing`.
//! - Entering a room is announced on every room change, populated or not.

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::Arc;

use rand::Rng;

use crate::error::EngineError;
use crate::events::{Event, EventKind};
use crate::hooks::{RoomCompletion, TotalCompletion};
use crate::host::{EntityId, PlayerId};
use crate::world::Location;

use super::config::PopulationPolicy;
use super::engine::{ensure_active, Engine};
use super::instance::{Instance, InstanceState, RemovalReason};
use super::mobs::TrackedMob;
use super::primary;

/// Progression state of one room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoomState {
    Dormant,
    Populated,
    Complete,
}

/// Live state of one room inside an instance.
pub(crate) struct RoomInstance {
    pub(crate) id: Arc<str>,
    pub(crate) state: RoomState,
    pub(crate) alive: HashMap<EntityId, TrackedMob>,
    pub(crate) visitors: HashSet<PlayerId>,
    /// Spawn serial counter.
    pub(crate) spawned: u32,
}

impl RoomInstance {
    pub(crate) fn new(id: Arc<str>) -> Self {
        Self {
            id,
            state: RoomState::Dormant,
            alive: HashMap::new(),
            visitors: HashSet::new(),
            spawned: 0,
        }
    }

    /// Dormant → Populated; `false` if the room already left `Dormant`.
    pub(crate) fn populate(&mut self) -> bool {
        if self.state != RoomState::Dormant {
            return false;
        }
        self.state = RoomState::Populated;
        true
    }

    pub(crate) fn ready_to_complete(&self) -> bool {
        self.state == RoomState::Populated && self.alive.is_empty()
    }

    /// Populated (and empty) → Complete.
    pub(crate) fn complete(&mut self) -> bool {
        if !self.ready_to_complete() {
            return false;
        }
        self.state = RoomState::Complete;
        true
    }
}

/// Uniform random offset within a horizontal disc of `radius`.
fn spread(radius: f64) -> Location {
    if radius <= 0.0 {
        return Location::ORIGIN;
    }
    let mut rng = rand::thread_rng();
    let r = radius * rng.gen::<f64>().sqrt();
    let theta = rng.gen_range(0.0..TAU);
    Location::new(r * theta.cos(), 0.0, r * theta.sin())
}

impl Engine {
    /// Records `player` entering `room`, populating it under
    /// [`PopulationPolicy::OnEntry`]. Primary context only.
    pub fn enter_room(
        &self,
        instance: &Arc<Instance>,
        player: PlayerId,
        room: &str,
    ) -> Result<(), EngineError> {
        primary::ensure("enter_room")?;
        ensure_active(instance)?;

        let idx = {
            let mut inner = instance.inner.lock();
            if !inner.players.contains(&player) {
                return Err(EngineError::PlayerNotInInstance { player });
            }
            let idx = inner
                .room_index(room)
                .ok_or_else(|| EngineError::RoomNotFound { room: room.to_string() })?;
            inner.positions.insert(player, idx);
            inner.rooms[idx].visitors.insert(player);
            idx
        };

        self.bus.publish(
            Event::new(EventKind::RoomPlayerEnter)
                .with_instance(instance.id(), instance.format_id())
                .with_room(room)
                .with_player(player),
        );

        if self.cfg.population == PopulationPolicy::OnEntry {
            self.populate_room(instance, idx);
        }
        Ok(())
    }

    /// Resolves the room under `at` for `player` and enters it when it changed.
    ///
    /// Returns the newly entered room. Primary context only.
    pub fn player_moved(&self, player: PlayerId, at: Location) -> Result<Option<String>, EngineError> {
        primary::ensure("player_moved")?;
        let Some(instance) = self.current_instance(player) else {
            return Ok(None);
        };
        let Some(room) = instance.room_at(at).map(str::to_string) else {
            return Ok(None);
        };

        let unchanged = {
            let inner = instance.inner.lock();
            let idx = inner.room_index(&room);
            idx.is_some() && inner.positions.get(&player).copied() == idx
        };
        if unchanged {
            return Ok(None);
        }
        self.enter_room(&instance, player, &room)?;
        Ok(Some(room))
    }

    /// Retries cancelled room and dungeon completions.
    ///
    /// Returns whether the instance has left `Active`. Primary context only.
    pub fn reevaluate(&self, instance: &Arc<Instance>) -> Result<bool, EngineError> {
        primary::ensure("reevaluate")?;
        ensure_active(instance)?;

        let ready: Vec<usize> = {
            let inner = instance.inner.lock();
            (0..inner.rooms.len())
                .filter(|&i| inner.rooms[i].ready_to_complete())
                .collect()
        };
        for idx in ready {
            self.try_complete_room(instance, idx);
        }
        self.evaluate_completion(instance);
        Ok(instance.state() != InstanceState::Active)
    }

    /// Spawns every mob of a dormant room.
    pub(crate) fn populate_room(&self, instance: &Arc<Instance>, idx: usize) {
        if !instance.inner.lock().rooms[idx].populate() {
            return;
        }

        let format = Arc::clone(instance.format());
        let template = &format.rooms[idx];
        let base = instance.origin() + template.origin;
        let mut spawned = 0u32;
        for def in &template.mobs {
            for _ in 0..def.count {
                let at = base + def.offset + spread(def.radius);
                if self.spawn_into(instance, idx, def, at).is_some() {
                    spawned += 1;
                }
            }
        }

        self.bus.publish(
            Event::new(EventKind::RoomPopulated)
                .with_instance(instance.id(), instance.format_id())
                .with_room(template.id.as_str())
                .with_count(spawned),
        );
        self.try_complete_room(instance, idx);
    }

    /// Populated + empty → Complete, unless an interceptor objects.
    pub(crate) fn try_complete_room(&self, instance: &Arc<Instance>, idx: usize) -> bool {
        if instance.state() != InstanceState::Active
            || !instance.inner.lock().rooms[idx].ready_to_complete()
        {
            return false;
        }

        let room = instance.format().rooms[idx].id.as_str();
        let verdict = self.hooks.fire(RoomCompletion::DELIVERY, "room_completion", |h| {
            h.on_room_completion(&RoomCompletion { instance, room })
        });
        if verdict.is_cancel() {
            self.bus.publish(
                Event::new(EventKind::TransitionCancelled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_room(room)
                    .with_reason("room_completion"),
            );
            return false;
        }

        let players = {
            let mut inner = instance.inner.lock();
            if !inner.rooms[idx].complete() {
                return false;
            }
            inner.players.clone()
        };
        self.bus.publish(
            Event::new(EventKind::RoomCompleted)
                .with_instance(instance.id(), instance.format_id())
                .with_room(room)
                .with_players(&players),
        );

        self.evaluate_completion(instance);
        true
    }

    /// Active → Completing once every required room is complete.
    pub(crate) fn evaluate_completion(&self, instance: &Arc<Instance>) -> bool {
        if instance.state() != InstanceState::Active
            || !instance.inner.lock().required_complete(instance.format())
        {
            return false;
        }

        let verdict = self.hooks.fire(TotalCompletion::DELIVERY, "total_completion", |h| {
            h.on_total_completion(&TotalCompletion { instance })
        });
        if verdict.is_cancel() {
            self.bus.publish(
                Event::new(EventKind::TransitionCancelled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_reason("total_completion"),
            );
            return false;
        }
        if !instance.transition(InstanceState::Active, InstanceState::Completing) {
            return false;
        }

        tracing::info!(instance = %instance.id(), format = instance.format_id(), "dungeon complete");
        self.bus.publish(
            Event::new(EventKind::TotalCompletion)
                .with_instance(instance.id(), instance.format_id())
                .with_players(&instance.players()),
        );
        self.dispose(instance, RemovalReason::Completed);
        true
    }
}
