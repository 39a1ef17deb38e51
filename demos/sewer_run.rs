//! # Example: one party clears a two-room sewer
//!
//! Loads a format, warms the cache, checks an instance out and plays it through
//! on a dedicated primary thread: walk into the first room, kill the zombies,
//! collect keys, open the gate and clear the second room.
//!
//! Run with `RUST_LOG=dungeonvisor=debug cargo run --example sewer_run`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dungeonvisor::{
    Checkout, ClientNotifier, ClientPayload, ClientSink, Config, Engine, EntityId, EventKind,
    Format, Host, HostError, JsonCodec, KeyPickup, Location, PlayerId, Subscribe, WorldAllocator,
    WorldError, WorldHandle,
};
use tracing_subscriber::EnvFilter;

const SEWER: &str = r#"{
    "id": "sewer-1",
    "schematic": "sewer.schem",
    "spawn": {"x": 2, "y": 1, "z": 5},
    "rooms": [
        {
            "id": "tunnel",
            "bounds": {"min": {"x": 0, "y": 0, "z": 0}, "max": {"x": 19, "y": 10, "z": 10}},
            "exits": ["cistern"],
            "key_drop": "marked_mob_kill",
            "mobs": [{"kind": "zombie", "offset": {"x": 8, "y": 1, "z": 5}, "count": 3, "radius": 2.5, "marked": true}]
        },
        {
            "id": "cistern",
            "origin": {"x": 20, "y": 0, "z": 0},
            "bounds": {"min": {"x": 0, "y": 0, "z": 0}, "max": {"x": 15, "y": 10, "z": 10}},
            "mobs": [{"kind": "slime", "offset": {"x": 7, "y": 1, "z": 5}}]
        }
    ],
    "doors": [{"id": "gate", "room": "tunnel", "offset": {"x": 19, "y": 1, "z": 5}, "required_keys": 2}]
}"#;

/// Pretends to copy schematics into a shared world.
struct Schematics;

impl WorldAllocator for Schematics {
    fn build_world(&self, format: &Format, origin: Location) -> Result<WorldHandle, WorldError> {
        std::thread::sleep(Duration::from_millis(50));
        Ok(WorldHandle(format!("{}@{}", format.schematic, origin)))
    }

    fn destroy_world(&self, world: &WorldHandle) -> Result<(), WorldError> {
        println!("[world] released {world}");
        Ok(())
    }
}

#[derive(Default)]
struct Server {
    next: AtomicU64,
    alive: Mutex<HashSet<EntityId>>,
}

impl Host for Server {
    fn spawn_entity(
        &self,
        kind: &str,
        at: Location,
        _props: &BTreeMap<String, String>,
    ) -> Result<EntityId, HostError> {
        let id = EntityId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        if let Ok(mut alive) = self.alive.lock() {
            alive.insert(id);
        }
        println!("[host] {kind} {id} at {at}");
        Ok(id)
    }

    fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.lock().map(|a| a.contains(&entity)).unwrap_or(false)
    }

    fn despawn(&self, entity: EntityId) {
        if let Ok(mut alive) = self.alive.lock() {
            alive.remove(&entity);
        }
    }
}

/// Prints what each player's client would receive.
struct Chat;

impl ClientSink for Chat {
    fn send(&self, channel: &str, player: PlayerId, payload: &[u8]) {
        println!("[{channel}] -> {player}: {}", String::from_utf8_lossy(payload));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config {
        cache_size: 1,
        key_pickup: KeyPickup::Manual,
        ..Config::default()
    };
    let notifier = ClientNotifier::new(
        Arc::new(JsonCodec::<ClientPayload>::new("dungeon:progress")),
        Arc::new(Chat),
    );
    let mut subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(notifier)];
    subs.push(Arc::new(dungeonvisor::LogWriter::new()));

    let host = Arc::new(Server::default());
    let (engine, driver) = Engine::builder(cfg, Arc::new(Schematics), host.clone())
        .with_subscribers(subs)
        .build()?;
    let _primary = driver.spawn_thread()?;

    engine.load_format_str(SEWER)?;
    for (format, report) in engine.warm_all().await {
        println!("[cache] {format}: {:?}", report?);
    }

    let (alice, bob) = (PlayerId::random(), PlayerId::random());
    let Checkout::Granted(inst) = engine.checkout("sewer-1", vec![alice, bob]).await? else {
        anyhow::bail!("no instance available");
    };
    println!("[party] entered {} at {}", inst.id(), inst.spawn_point());
    let mut events = engine.subscribe();

    // Walk into the tunnel; the zombies spawn on entry.
    let e = engine.clone();
    let at = inst.origin() + Location::new(4.0, 1.0, 5.0);
    let room = engine.primary().run(move || e.player_moved(alice, at)).await??;
    println!("[party] alice is in {room:?}");

    for mob in inst.alive_mobs("tunnel").unwrap_or_default() {
        host.despawn(mob);
        let e = engine.clone();
        engine.primary().run(move || e.entity_died(mob)).await??;
    }

    while inst.pending_keys() > 0 {
        println!("[party] picked up {:?}", engine.pickup_key(&inst, bob)?);
    }
    println!("[party] gate: {:?}", engine.use_key(&inst, "gate")?);

    let e = engine.clone();
    let i = inst.clone();
    engine
        .primary()
        .run(move || e.enter_room(&i, bob, "cistern"))
        .await??;
    for mob in inst.alive_mobs("cistern").unwrap_or_default() {
        let e = engine.clone();
        engine.primary().run(move || e.entity_died(mob)).await??;
    }

    while let Ok(ev) = tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        let ev = ev?;
        if ev.kind == EventKind::InstanceDisposed {
            println!("[party] instance disposed ({})", ev.reason.as_deref().unwrap_or("-"));
            break;
        }
    }

    engine.shutdown().await;
    Ok(())
}
