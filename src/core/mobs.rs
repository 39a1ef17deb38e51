//! # Mob tracking.
//!
//! Every mob a room spawns is tracked by entity id in the room's alive set and
//! in the engine-wide entity index:
//!
//! ```text
//! spawn_mob ──► MobSpawn hook ──► Host::spawn_entity ──► alive[room] + index ──► MobSpawned
//! entity_died(e) ──► index.remove(e) ──► alive[room].remove(e) ──► MobKilled ──► key drop? ──► room completion?
//! reconcile(inst) ──► !Host::is_alive(e) for tracked e ──► same as death, reason "reclaimed"
//! ```
//!
//! ## Rules
//! - A handle is only live while its entity is both tracked and alive in the host.
//! - Deaths reported for a completed room change nothing.
//! - A spawn the host refuses is skipped and does not hold the room open.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::EngineError;
use crate::events::{Event, EventKind};
use crate::format::{KeyDropMode, MobSpawnDef};
use crate::hooks::MobSpawn;
use crate::host::EntityId;
use crate::world::Location;

use super::engine::{ensure_active, Engine};
use super::instance::{Instance, InstanceId, InstanceState};
use super::primary;
use super::room::RoomState;

/// Stable reference to one spawned mob.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MobHandle {
    pub instance: InstanceId,
    pub room: Arc<str>,
    /// Spawn serial within the room, starting at 1.
    pub serial: u32,
    pub entity: EntityId,
}

/// Bookkeeping for one alive mob.
#[derive(Debug)]
pub(crate) struct TrackedMob {
    pub(crate) serial: u32,
    pub(crate) marked: bool,
    pub(crate) location: Location,
}

impl Engine {
    /// Spawns one mob from `def` into a populated room at `at`.
    ///
    /// Returns `None` when an interceptor cancelled the spawn or the host
    /// refused it. Primary context only.
    pub fn spawn_mob(
        &self,
        instance: &Arc<Instance>,
        room: &str,
        def: &MobSpawnDef,
        at: Location,
    ) -> Result<Option<MobHandle>, EngineError> {
        primary::ensure("spawn_mob")?;
        ensure_active(instance)?;
        let idx = {
            let inner = instance.inner.lock();
            let idx = inner
                .room_index(room)
                .ok_or_else(|| EngineError::RoomNotFound { room: room.to_string() })?;
            if inner.rooms[idx].state != RoomState::Populated {
                return Err(EngineError::RoomNotPopulated { room: room.to_string() });
            }
            idx
        };
        Ok(self.spawn_into(instance, idx, def, at))
    }

    pub(crate) fn spawn_into(
        &self,
        instance: &Arc<Instance>,
        idx: usize,
        def: &MobSpawnDef,
        at: Location,
    ) -> Option<MobHandle> {
        let room = instance.format().rooms[idx].id.as_str();
        let mut spawn = MobSpawn {
            instance,
            room,
            def,
            kind: def.kind.clone(),
            location: at,
            custom: def.custom.clone(),
        };
        let verdict = self
            .hooks
            .fire(MobSpawn::DELIVERY, "mob_spawn", |h| h.on_mob_spawn(&mut spawn));
        if verdict.is_cancel() {
            self.bus.publish(
                Event::new(EventKind::TransitionCancelled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_room(room)
                    .with_entity_kind(spawn.kind.as_str())
                    .with_reason("mob_spawn"),
            );
            return None;
        }

        let entity = match self.host.spawn_entity(&spawn.kind, spawn.location, &spawn.custom) {
            Ok(entity) => entity,
            Err(err) => {
                tracing::warn!(
                    instance = %instance.id(),
                    room,
                    kind = spawn.kind.as_str(),
                    error = err.as_label(),
                    "mob spawn refused by host"
                );
                return None;
            }
        };

        let serial = {
            let mut inner = instance.inner.lock();
            if instance.is_released() {
                None
            } else {
                let slot = &mut inner.rooms[idx];
                slot.spawned += 1;
                let serial = slot.spawned;
                slot.alive.insert(
                    entity,
                    TrackedMob {
                        serial,
                        marked: def.marked,
                        location: spawn.location,
                    },
                );
                Some(serial)
            }
        };
        let Some(serial) = serial else {
            self.host.despawn(entity);
            return None;
        };

        self.entities.write().insert(entity, (Arc::clone(instance), idx));
        if instance.is_released() {
            self.entities.write().remove(&entity);
        }

        self.bus.publish(
            Event::new(EventKind::MobSpawned)
                .with_instance(instance.id(), instance.format_id())
                .with_room(room)
                .with_entity(entity)
                .with_entity_kind(spawn.kind.as_str())
                .with_location(spawn.location),
        );
        Some(MobHandle {
            instance: instance.id(),
            room: Arc::from(room),
            serial,
            entity,
        })
    }

    /// Host report that `entity` died.
    ///
    /// Returns `false` for entities the engine does not track (or no longer
    /// tracks). Primary context only.
    pub fn entity_died(&self, entity: EntityId) -> Result<bool, EngineError> {
        primary::ensure("entity_died")?;
        let Some((instance, idx)) = self.entities.write().remove(&entity) else {
            return Ok(false);
        };

        let (mob, emptied) = {
            let mut inner = instance.inner.lock();
            let room = &mut inner.rooms[idx];
            if room.state == RoomState::Complete {
                return Ok(false);
            }
            let Some(mob) = room.alive.remove(&entity) else {
                return Ok(false);
            };
            (mob, room.alive.is_empty())
        };

        let template = &instance.format().rooms[idx];
        self.bus.publish(
            Event::new(EventKind::MobKilled)
                .with_instance(instance.id(), instance.format_id())
                .with_room(template.id.as_str())
                .with_entity(entity)
                .with_location(mob.location)
                .with_reason("killed"),
        );

        let drops = match template.key_drop {
            KeyDropMode::None => false,
            KeyDropMode::MarkedMobKill => mob.marked,
            KeyDropMode::RoomClear => emptied,
        };
        if drops && instance.state() == InstanceState::Active {
            if let Err(err) = self.drop_key(&instance, mob.location) {
                tracing::debug!(instance = %instance.id(), error = err.as_label(), "key drop skipped");
            }
        }

        if emptied {
            self.try_complete_room(&instance, idx);
        }
        Ok(true)
    }

    /// Entity behind `handle` while it is tracked and alive, `None` otherwise.
    pub fn living_handle(&self, handle: &MobHandle) -> Option<EntityId> {
        let instance = self.instance(handle.instance)?;
        let tracked = {
            let inner = instance.inner.lock();
            inner
                .room_index(&handle.room)
                .and_then(|i| inner.rooms[i].alive.get(&handle.entity))
                .is_some_and(|mob| mob.serial == handle.serial)
        };
        (tracked && self.host.is_alive(handle.entity)).then_some(handle.entity)
    }

    /// Drops tracked mobs the host no longer has and completes emptied rooms.
    ///
    /// Returns how many handles were pruned. Primary context only.
    pub fn reconcile(&self, instance: &Arc<Instance>) -> Result<usize, EngineError> {
        primary::ensure("reconcile")?;
        ensure_active(instance)?;

        let tracked: Vec<(usize, EntityId)> = {
            let inner = instance.inner.lock();
            inner
                .rooms
                .iter()
                .enumerate()
                .filter(|(_, r)| r.state == RoomState::Populated)
                .flat_map(|(i, r)| r.alive.keys().map(move |e| (i, *e)))
                .collect()
        };
        let gone: Vec<(usize, EntityId)> = tracked
            .into_iter()
            .filter(|(_, e)| !self.host.is_alive(*e))
            .collect();
        if gone.is_empty() {
            return Ok(0);
        }

        let mut emptied = BTreeSet::new();
        let mut pruned = Vec::with_capacity(gone.len());
        {
            let mut inner = instance.inner.lock();
            for &(idx, entity) in &gone {
                let room = &mut inner.rooms[idx];
                if let Some(mob) = room.alive.remove(&entity) {
                    pruned.push((idx, entity, mob.location));
                    if room.alive.is_empty() {
                        emptied.insert(idx);
                    }
                }
            }
        }
        {
            let mut index = self.entities.write();
            for (_, entity, _) in &pruned {
                index.remove(entity);
            }
        }

        for &(idx, entity, location) in &pruned {
            self.bus.publish(
                Event::new(EventKind::MobKilled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_room(instance.format().rooms[idx].id.as_str())
                    .with_entity(entity)
                    .with_location(location)
                    .with_reason("reclaimed"),
            );
        }
        tracing::debug!(instance = %instance.id(), pruned = pruned.len(), "reconciled mobs");

        for idx in emptied {
            self.try_complete_room(instance, idx);
        }
        Ok(pruned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, PopulationPolicy};
    use crate::core::keys::KeyUse;
    use crate::events::EventKind;
    use crate::hooks::{Intercept, Verdict};
    use crate::testkit::{self, drain, on_primary, settle, wait_state};

    fn on_activation() -> Config {
        Config {
            cache_size: 0,
            population: PopulationPolicy::OnActivation,
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sewer_run_to_completion() {
        let h = testkit::harness(on_activation());
        let mut rx = h.engine.subscribe();
        let (inst, _player) = h.checkout_one().await;

        let mobs = inst.alive_mobs("a").unwrap();
        assert_eq!(mobs.len(), 3);
        assert_eq!(inst.room_state("b"), Some(RoomState::Complete));

        for (n, mob) in mobs.iter().copied().enumerate() {
            h.host.kill(mob);
            let died = on_primary(&h.engine, move |e| e.entity_died(mob))
                .await
                .unwrap();
            assert!(died);
            if n < 2 {
                assert_eq!(inst.room_state("a"), Some(RoomState::Populated));
            }
        }

        wait_state(&inst, InstanceState::Disposed).await;
        settle(&h.engine).await;
        assert_eq!(h.worlds.destroyed().len(), 1);

        let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
        let completions = kinds
            .iter()
            .filter(|k| **k == EventKind::TotalCompletion)
            .count();
        assert_eq!(completions, 1);
        let killed = kinds.iter().filter(|k| **k == EventKind::MobKilled).count();
        assert_eq!(killed, 3);
        assert!(kinds.contains(&EventKind::InstanceDisposed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_and_repeated_deaths_are_ignored() {
        let h = testkit::harness(on_activation());
        let (inst, _player) = h.checkout_one().await;
        let mob = inst.alive_mobs("a").unwrap()[0];

        let stranger = on_primary(&h.engine, |e| e.entity_died(EntityId(9_999)))
            .await
            .unwrap();
        assert!(!stranger);

        assert!(on_primary(&h.engine, move |e| e.entity_died(mob)).await.unwrap());
        assert!(!on_primary(&h.engine, move |e| e.entity_died(mob)).await.unwrap());
        assert_eq!(inst.alive_mobs("a").unwrap().len(), 2);

        let err = h.engine.entity_died(mob).unwrap_err();
        assert_eq!(err.as_label(), "engine_wrong_context");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_goes_stale_when_host_loses_entity() {
        let h = testkit::harness(on_activation());
        let (inst, _player) = h.checkout_one().await;

        let def = inst.format().rooms[0].mobs[0].clone();
        let i = inst.clone();
        let at = inst.origin();
        let handle = on_primary(&h.engine, move |e| e.spawn_mob(&i, "a", &def, at))
            .await
            .unwrap()
            .expect("spawned");
        assert_eq!(handle.serial, 4);
        assert_eq!(h.engine.living_handle(&handle), Some(handle.entity));

        h.host.kill(handle.entity);
        assert_eq!(h.engine.living_handle(&handle), None);

        let i = inst.clone();
        let pruned = on_primary(&h.engine, move |e| e.reconcile(&i)).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(inst.alive_mobs("a").unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_absent_after_reported_death() {
        use crate::host::Host;

        let h = testkit::harness(on_activation());
        let (inst, _player) = h.checkout_one().await;

        let def = inst.format().rooms[0].mobs[0].clone();
        let i = inst.clone();
        let at = inst.origin();
        let handle = on_primary(&h.engine, move |e| e.spawn_mob(&i, "a", &def, at))
            .await
            .unwrap()
            .expect("spawned");

        let entity = handle.entity;
        assert!(on_primary(&h.engine, move |e| e.entity_died(entity)).await.unwrap());
        assert!(h.host.is_alive(entity), "host has not reclaimed it yet");

        settle(&h.engine).await;
        let mut rx = h.engine.subscribe();
        let alive = inst.alive_mobs("a").unwrap();
        assert_eq!(alive.len(), 3);

        assert_eq!(h.engine.living_handle(&handle), None);
        assert_eq!(h.engine.living_handle(&handle), None);
        assert_eq!(inst.alive_mobs("a").unwrap(), alive);
        assert!(drain(&mut rx).is_empty(), "queries publish nothing");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconcile_completes_emptied_room() {
        let h = testkit::harness(on_activation());
        let (inst, _player) = h.checkout_one().await;
        for mob in inst.alive_mobs("a").unwrap() {
            h.host.kill(mob);
        }

        let i = inst.clone();
        let pruned = on_primary(&h.engine, move |e| e.reconcile(&i)).await.unwrap();
        assert_eq!(pruned, 3);
        wait_state(&inst, InstanceState::Disposed).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_into_dormant_room_is_rejected() {
        let h = testkit::harness(Config {
            cache_size: 0,
            ..Config::default()
        });
        let (inst, _player) = h.checkout_one().await;
        let def = inst.format().rooms[0].mobs[0].clone();
        let i = inst.clone();
        let err = on_primary(&h.engine, move |e| e.spawn_mob(&i, "a", &def, Location::ORIGIN))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "engine_room_not_populated");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refused_spawns_do_not_block_completion() {
        let h = testkit::harness(on_activation());
        h.host.refuse("zombie");
        let (inst, _player) = h.checkout_one().await;
        wait_state(&inst, InstanceState::Disposed).await;
        assert!(h.host.spawned_kinds().is_empty());
    }

    struct Elites;

    impl Intercept for Elites {
        fn on_mob_spawn(&self, ev: &mut MobSpawn<'_>) -> Verdict {
            ev.kind = format!("elite_{}", ev.kind);
            ev.custom.insert("tier".into(), "2".into());
            Verdict::Continue
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interceptor_rewrites_spawn() {
        let h = testkit::harness_with(on_activation(), |b| b.with_interceptor(Arc::new(Elites)));
        let (_inst, _player) = h.checkout_one().await;
        assert_eq!(h.host.spawned_kinds(), vec!["elite_zombie"; 3]);
        assert!(h
            .host
            .spawned_props()
            .iter()
            .all(|p| p.get("tier").map(String::as_str) == Some("2")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_marked_kills_drop_keys() {
        let h = testkit::harness(Config {
            cache_size: 0,
            ..Config::default()
        });
        h.engine.load_format_str(testkit::CRYPT).unwrap();
        h.engine.ensure_warm("crypt", 1).await.unwrap();
        let player = crate::host::PlayerId::random();
        let inst = h
            .engine
            .checkout("crypt", vec![player])
            .await
            .unwrap()
            .into_instance()
            .expect("granted");

        let i = inst.clone();
        on_primary(&h.engine, move |e| e.enter_room(&i, player, "hall"))
            .await
            .unwrap();
        let mobs = inst.alive_mobs("hall").unwrap();
        assert_eq!(mobs.len(), 3);

        for mob in mobs {
            on_primary(&h.engine, move |e| e.entity_died(mob)).await.unwrap();
        }
        assert_eq!(inst.door_keys(), 2, "two marked wardens drop a key each");
        assert_eq!(h.engine.use_key(&inst, "vault").unwrap(), KeyUse::Unlocked);
    }
}
