//! # Engine: catalog, cache, players and disposal in one place.
//!
//! The [`Engine`] owns the event bus, the hook set, the format catalog, the
//! instance cache and the indices that map players and entities back to their
//! instance. It is always shared as `Arc<Engine>` and is built by
//! [`EngineBuilder`](crate::EngineBuilder).
//!
//! ## High-level architecture
//! ```text
//! Host (primary thread)                    async callers
//!   PrimaryDriver::drain() ◄── jobs ───── checkout / dispose / drop_key ...
//!        │                                      │
//!        ├─ enter_room / player_moved           ├─ ensure_warm ─► spawn_blocking(build_world)
//!        ├─ entity_died / reconcile             └─ dispose ─────► TaskTracker: destroy_world
//!        └─ spawn_mob (Host::spawn_entity)
//!
//! Every transition:  HookSet::fire (may cancel) ─► state change ─► Bus::publish(Event)
//!                                                                    │
//!                                       engine listener ─► SubscriberSet ─► LogWriter, ClientNotifier, ...
//! ```
//!
//! ## Disposal
//! ```text
//! dispose(inst, reason)
//!   ├─ begin_release() (first caller only)
//!   ├─ state → Completing (Failed stays Failed)
//!   ├─ unindex players + entities, drop from active map and pool
//!   ├─ despawn tracked entities on the primary context
//!   └─ background: destroy_world ─► release layout slot ─► Disposed | Failed ─► InstanceDisposed
//! ```
//!
//! ## Lock order
//! Engine maps are never held while an instance mutex is taken, and no lock is
//! held while interceptors run or the host is called.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{EngineError, FormatError};
use crate::events::{Bus, Event, EventKind};
use crate::format::{Format, FormatRegistry, LoadReport};
use crate::hooks::{FormatLoad, HookSet};
use crate::host::{EntityId, Host, PlayerId};
use crate::subscribers::SubscriberSet;
use crate::world::WorldAllocator;

use super::builder::EngineBuilder;
use super::cache::InstanceCache;
use super::config::Config;
use super::instance::{Instance, InstanceId, InstanceState, RemovalReason};
use super::primary::{on_primary, PrimaryHandle};

/// Fails unless the instance is `Active`.
pub(crate) fn ensure_active(instance: &Instance) -> Result<(), EngineError> {
    match instance.state() {
        InstanceState::Active => Ok(()),
        state => Err(EngineError::InvalidState {
            instance: instance.id(),
            state,
        }),
    }
}

/// Dungeon instancing engine.
pub struct Engine {
    pub(crate) this: Weak<Engine>,
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) hooks: HookSet,
    pub(crate) formats: FormatRegistry,
    pub(crate) cache: InstanceCache,
    pub(crate) allocator: Arc<dyn WorldAllocator>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) primary: PrimaryHandle,
    pub(crate) rt: tokio::runtime::Handle,
    /// Background builds, refills, key timers and world releases.
    pub(crate) tracker: TaskTracker,
    pub(crate) token: CancellationToken,
    pub(crate) active: RwLock<HashMap<InstanceId, Arc<Instance>>>,
    pub(crate) players: RwLock<HashMap<PlayerId, Arc<Instance>>>,
    /// Tracked entity → (instance, room index).
    pub(crate) entities: RwLock<HashMap<EntityId, (Arc<Instance>, usize)>>,
    pub(crate) listener: Mutex<Option<JoinHandle<()>>>,
    pub(crate) listener_stop: CancellationToken,
}

impl Engine {
    /// Starts building an engine; see [`EngineBuilder`].
    pub fn builder(
        cfg: Config,
        allocator: Arc<dyn WorldAllocator>,
        host: Arc<dyn Host>,
    ) -> EngineBuilder {
        EngineBuilder::new(cfg, allocator, host)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// New receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Interceptors; register and unregister at any time.
    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    /// Handle for queueing work onto the primary context.
    pub fn primary(&self) -> &PrimaryHandle {
        &self.primary
    }

    // === Catalog ===

    /// Validates and registers one format document.
    ///
    /// Replacing a loaded format disposes every instance built from the old one.
    pub fn load_format_str(&self, src: &str) -> Result<Arc<Format>, EngineError> {
        match self.formats.prepare(src) {
            Ok(format) => Ok(self.admit(Arc::new(format))?),
            Err(err) => {
                self.reject(&err);
                Err(err.into())
            }
        }
    }

    /// Loads a `{"dungeons": [...]}` catalog document entry by entry.
    ///
    /// A bad entry is rejected on its own; the call fails only when the
    /// document itself cannot be read.
    pub fn load_formats(&self, src: &str) -> Result<LoadReport, EngineError> {
        let entries = self.formats.prepare_catalog(src).inspect_err(|err| self.reject(err))?;
        let mut report = LoadReport::default();
        for entry in entries {
            match entry {
                Ok(format) => match self.admit(Arc::new(format)) {
                    Ok(format) => report.loaded.push(format),
                    Err(err) => report.rejected.push(err),
                },
                Err(err) => {
                    self.reject(&err);
                    report.rejected.push(err);
                }
            }
        }
        tracing::info!(
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "format catalog loaded"
        );
        Ok(report)
    }

    /// Takes a format out of the catalog and disposes every instance built from it.
    pub fn remove_format(&self, id: &str) -> Result<Arc<Format>, EngineError> {
        let old = self
            .formats
            .remove(id)
            .ok_or_else(|| EngineError::FormatNotFound { format: id.to_string() })?;
        self.retire(&old);
        tracing::info!(format = id, "format removed");
        self.bus
            .publish(Event::new(EventKind::FormatRemoved).with_format(id));
        Ok(old)
    }

    pub fn format(&self, id: &str) -> Result<Arc<Format>, EngineError> {
        self.formats.get(id)
    }

    /// Sorted ids of every loaded format.
    pub fn format_ids(&self) -> Vec<String> {
        self.formats.ids()
    }

    fn admit(&self, format: Arc<Format>) -> Result<Arc<Format>, FormatError> {
        let verdict = self.hooks.fire(FormatLoad::DELIVERY, "format_load", |h| {
            h.on_format_load(&FormatLoad { format: &format })
        });
        if verdict.is_cancel() {
            let err = FormatError::Cancelled {
                format: format.id.clone(),
            };
            self.reject(&err);
            return Err(err);
        }

        if let Some(old) = self.formats.insert(Arc::clone(&format)) {
            self.retire(&old);
        }
        tracing::info!(format = format.id.as_str(), rooms = format.rooms.len(), "format loaded");
        self.bus
            .publish(Event::new(EventKind::FormatLoaded).with_format(format.id.as_str()));
        Ok(format)
    }

    fn reject(&self, err: &FormatError) {
        tracing::warn!(format = err.format_id(), error = %err, "format rejected");
        let mut ev = Event::new(EventKind::FormatRejected).with_reason(err.as_label());
        if let Some(id) = err.format_id() {
            ev = ev.with_format(id);
        }
        self.bus.publish(ev);
    }

    /// Disposes every instance built from a replaced format.
    fn retire(&self, old: &Arc<Format>) {
        let mut stale: Vec<Arc<Instance>> = self
            .active
            .read()
            .values()
            .filter(|i| Arc::ptr_eq(i.format(), old))
            .cloned()
            .collect();
        stale.extend(
            self.cache
                .all()
                .into_iter()
                .filter(|i| Arc::ptr_eq(i.format(), old)),
        );
        for instance in stale {
            self.dispose(&instance, RemovalReason::FormatChange);
        }
    }

    // === Instances and players ===

    /// Active instance by id.
    pub fn instance(&self, id: InstanceId) -> Option<Arc<Instance>> {
        self.active.read().get(&id).cloned()
    }

    pub fn active_instances(&self) -> Vec<Arc<Instance>> {
        self.active.read().values().cloned().collect()
    }

    /// Instance the player is currently assigned to.
    pub fn current_instance(&self, player: PlayerId) -> Option<Arc<Instance>> {
        self.players.read().get(&player).cloned()
    }

    /// Takes `player` out of their instance; an emptied instance is disposed.
    pub fn remove_player(&self, player: PlayerId) -> Option<InstanceId> {
        self.detach_player(player).map(|i| i.id())
    }

    pub(crate) fn detach_player(&self, player: PlayerId) -> Option<Arc<Instance>> {
        let previous = self.players.write().remove(&player)?;
        let emptied = {
            let mut inner = previous.inner.lock();
            inner.players.retain(|p| *p != player);
            inner.positions.remove(&player);
            for room in &mut inner.rooms {
                room.visitors.remove(&player);
            }
            inner.players.is_empty()
        };
        tracing::debug!(%player, instance = %previous.id(), "player left instance");
        if emptied {
            self.dispose(&previous, RemovalReason::NoPlayersLeft);
        }
        Some(previous)
    }

    pub(crate) fn unindex(&self, instance: &Arc<Instance>, players: &[PlayerId]) {
        {
            let mut index = self.players.write();
            for player in players {
                if index.get(player).is_some_and(|i| Arc::ptr_eq(i, instance)) {
                    index.remove(player);
                }
            }
        }
        self.active.write().remove(&instance.id());
    }

    /// Moves the instance to `Failed`, announces it and disposes it.
    pub(crate) fn fail(&self, instance: &Arc<Instance>, reason: &str, removal: RemovalReason) {
        if instance.advance_to(InstanceState::Failed) {
            tracing::warn!(instance = %instance.id(), format = instance.format_id(), reason, "instance failed");
            self.bus.publish(
                Event::new(EventKind::InstanceFailed)
                    .with_instance(instance.id(), instance.format_id())
                    .with_reason(reason),
            );
        }
        self.dispose(instance, removal);
    }

    /// Releases everything the instance holds. Only the first call has an effect.
    ///
    /// The world is destroyed in the background; `InstanceDisposed` is
    /// published once it is gone.
    pub fn dispose(&self, instance: &Arc<Instance>, reason: RemovalReason) -> bool {
        if !instance.begin_release() {
            return false;
        }
        instance.advance_to(InstanceState::Completing);

        let (world, players, entities) = {
            let mut inner = instance.inner.lock();
            let players = std::mem::take(&mut inner.players);
            inner.positions.clear();
            (inner.world.take(), players, inner.take_entities())
        };

        self.unindex(instance, &players);
        if !entities.is_empty() {
            let mut index = self.entities.write();
            for entity in &entities {
                index.remove(entity);
            }
        }
        self.cache.remove(instance.format_id(), instance.id());
        self.despawn(entities);

        tracing::debug!(instance = %instance.id(), reason = reason.as_label(), "disposing instance");

        let allocator = Arc::clone(&self.allocator);
        let layout = Arc::clone(&self.cache.layout);
        let bus = self.bus.clone();
        let instance = Arc::clone(instance);
        self.tracker.spawn_on(
            async move {
                let mut failure = None;
                if let Some(world) = world {
                    let destroyed =
                        tokio::task::spawn_blocking(move || allocator.destroy_world(&world)).await;
                    failure = match destroyed {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err.as_message()),
                        Err(join) => Some(join.to_string()),
                    };
                }

                match failure {
                    None => {
                        layout.lock().release(instance.slot());
                        instance.transition(InstanceState::Completing, InstanceState::Disposed);
                    }
                    Some(reason) => {
                        tracing::error!(instance = %instance.id(), reason = reason.as_str(), "world release failed");
                        if instance.advance_to(InstanceState::Failed) {
                            bus.publish(
                                Event::new(EventKind::InstanceFailed)
                                    .with_instance(instance.id(), instance.format_id())
                                    .with_reason(reason),
                            );
                        }
                    }
                }

                bus.publish(
                    Event::new(EventKind::InstanceDisposed)
                        .with_instance(instance.id(), instance.format_id())
                        .with_players(&players)
                        .with_reason(reason.as_label()),
                );
            },
            &self.rt,
        );
        true
    }

    fn despawn(&self, entities: Vec<EntityId>) {
        if entities.is_empty() {
            return;
        }
        if on_primary() {
            for entity in entities {
                self.host.despawn(entity);
            }
            return;
        }
        let host = Arc::clone(&self.host);
        let queued = self.primary.submit(move || {
            for entity in entities {
                host.despawn(entity);
            }
        });
        if let Err(err) = queued {
            tracing::warn!(error = err.as_label(), "entities left behind");
        }
    }

    // === Shutdown ===

    /// Disposes every instance, waits for background work and stops subscribers.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let mut all = self.active_instances();
        all.extend(self.cache.all());
        tracing::info!(instances = all.len(), "engine shutting down");
        for instance in &all {
            self.dispose(instance, RemovalReason::Shutdown);
        }

        self.tracker.close();
        self.tracker.wait().await;

        self.listener_stop.cancel();
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        self.hooks.clear();
    }
}

/// Forwards bus events to the subscriber set until stopped.
pub(crate) fn spawn_listener(
    bus: &Bus,
    set: SubscriberSet,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        while let Ok(ev) = rx.try_recv() {
            set.emit(&ev);
        }
        set.shutdown().await;
    })
}
