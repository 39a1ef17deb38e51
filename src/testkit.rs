//! In-memory world allocator, host and fixtures shared by unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::core::{Config, Engine, EngineBuilder, Instance, InstanceState};
use crate::error::{HostError, WorldError};
use crate::events::Event;
use crate::format::Format;
use crate::host::{EntityId, Host, PlayerId};
use crate::world::{Location, WorldAllocator, WorldHandle};

/// Two rooms; `a` spawns three zombies and holds a two-key gate.
pub const SEWER: &str = r#"{
    "id": "sewer-1",
    "schematic": "sewer.schem",
    "spawn": {"x": 2, "y": 1, "z": 5},
    "bonus_keys": 2,
    "rooms": [
        {
            "id": "a",
            "bounds": {"min": {"x": 0, "y": 0, "z": 0}, "max": {"x": 19, "y": 10, "z": 10}},
            "exits": ["b"],
            "mobs": [{"kind": "zombie", "offset": {"x": 5, "y": 1, "z": 5}, "count": 3}]
        },
        {
            "id": "b",
            "origin": {"x": 20, "y": 0, "z": 0},
            "bounds": {"min": {"x": 0, "y": 0, "z": 0}, "max": {"x": 10, "y": 10, "z": 10}}
        }
    ],
    "doors": [{"id": "gate", "room": "a", "offset": {"x": 19, "y": 1, "z": 5}, "required_keys": 2}]
}"#;

/// Marked wardens in `hall` drop the keys for the `vault` door.
pub const CRYPT: &str = r#"{
    "id": "crypt",
    "schematic": "crypt.schem",
    "rooms": [
        {
            "id": "hall",
            "exits": ["vault"],
            "key_drop": "marked_mob_kill",
            "mobs": [
                {"kind": "warden", "count": 2, "marked": true, "radius": 3.0},
                {"kind": "rat"}
            ]
        },
        {"id": "vault", "origin": {"x": 30, "y": 0, "z": 0}, "mobs": [{"kind": "lich"}]}
    ],
    "doors": [{"id": "vault", "room": "hall", "offset": {"x": 29, "y": 1, "z": 5}, "required_keys": 2}]
}"#;

pub fn sewer_format() -> Arc<Format> {
    Arc::new(serde_json::from_str(SEWER).expect("sewer fixture"))
}

#[derive(Default)]
pub struct FakeWorlds {
    built: AtomicUsize,
    fail_builds: AtomicBool,
    fail_destroys: AtomicBool,
    destroyed: Mutex<Vec<WorldHandle>>,
}

impl FakeWorlds {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> Vec<WorldHandle> {
        self.destroyed.lock().clone()
    }

    pub fn fail_builds(&self, on: bool) {
        self.fail_builds.store(on, Ordering::SeqCst);
    }

    pub fn fail_destroys(&self, on: bool) {
        self.fail_destroys.store(on, Ordering::SeqCst);
    }
}

impl WorldAllocator for FakeWorlds {
    fn build_world(&self, format: &Format, origin: Location) -> Result<WorldHandle, WorldError> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(WorldError::Build {
                format: format.id.clone(),
                reason: "disk full".into(),
            });
        }
        let n = self.built.fetch_add(1, Ordering::SeqCst);
        Ok(WorldHandle(format!("{}#{}@{}", format.id, n, origin)))
    }

    fn destroy_world(&self, world: &WorldHandle) -> Result<(), WorldError> {
        if self.fail_destroys.load(Ordering::SeqCst) {
            return Err(WorldError::Destroy {
                world: world.0.clone(),
                reason: "locked".into(),
            });
        }
        self.destroyed.lock().push(world.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHost {
    next: AtomicU64,
    alive: Mutex<HashSet<EntityId>>,
    refused: Mutex<HashSet<String>>,
    spawned: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl FakeHost {
    pub fn kill(&self, entity: EntityId) {
        self.alive.lock().remove(&entity);
    }

    pub fn refuse(&self, kind: &str) {
        self.refused.lock().insert(kind.to_string());
    }

    pub fn spawned_kinds(&self) -> Vec<String> {
        self.spawned.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn spawned_props(&self) -> Vec<BTreeMap<String, String>> {
        self.spawned.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}

impl Host for FakeHost {
    fn spawn_entity(
        &self,
        kind: &str,
        _at: Location,
        props: &BTreeMap<String, String>,
    ) -> Result<EntityId, HostError> {
        assert!(crate::core::on_primary(), "spawn off the primary context");
        if self.refused.lock().contains(kind) {
            return Err(HostError::Refused {
                kind: kind.to_string(),
                reason: "chunk unloaded".into(),
            });
        }
        let id = EntityId(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.alive.lock().insert(id);
        self.spawned.lock().push((kind.to_string(), props.clone()));
        Ok(id)
    }

    fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.lock().contains(&entity)
    }

    fn despawn(&self, entity: EntityId) {
        self.alive.lock().remove(&entity);
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub worlds: Arc<FakeWorlds>,
    pub host: Arc<FakeHost>,
    _primary: std::thread::JoinHandle<()>,
}

impl Harness {
    /// Warms one sewer instance if needed and checks it out for a fresh player.
    pub async fn checkout_one(&self) -> (Arc<Instance>, PlayerId) {
        if self.engine.cached_instances("sewer-1").is_empty() {
            self.engine.ensure_warm("sewer-1", 1).await.unwrap();
        }
        let player = PlayerId::random();
        let inst = self
            .engine
            .checkout("sewer-1", vec![player])
            .await
            .unwrap()
            .into_instance()
            .expect("checkout granted");
        (inst, player)
    }
}

pub fn harness(cfg: Config) -> Harness {
    harness_with(cfg, |b| b)
}

/// Engine with the sewer format loaded and a dedicated primary thread.
pub fn harness_with(cfg: Config, customize: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Harness {
    let worlds = Arc::new(FakeWorlds::default());
    let host = Arc::new(FakeHost::default());
    let builder = Engine::builder(cfg, worlds.clone(), host.clone());
    let (engine, driver) = customize(builder).build().unwrap();
    let primary = driver.spawn_thread().unwrap();
    engine.load_format_str(SEWER).unwrap();
    Harness {
        engine,
        worlds,
        host,
        _primary: primary,
    }
}

/// Runs `f` against the engine on the primary context.
pub async fn on_primary<T, F>(engine: &Arc<Engine>, f: F) -> T
where
    F: FnOnce(&Engine) -> T + Send + 'static,
    T: Send + 'static,
{
    let e = Arc::clone(engine);
    engine.primary().run(move || f(e.as_ref())).await.unwrap()
}

pub async fn wait_state(inst: &Instance, state: InstanceState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while inst.state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "instance stuck in {:?}, wanted {:?}",
            inst.state(),
            state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for every background task spawned so far.
pub async fn settle(engine: &Engine) {
    engine.tracker.close();
    engine.tracker.wait().await;
    engine.tracker.reopen();
}

/// Everything currently buffered on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
