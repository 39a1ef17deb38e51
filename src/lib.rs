//! # dungeonvisor
//!
//! **Dungeonvisor** is a dungeon instancing engine for game servers.
//!
//! It loads dungeon formats (rooms, doors, mob spawns), keeps a pool of
//! pre-built instances per format, hands them to parties with one atomic
//! checkout, and drives each run from first room entry to world release.
//! The crate owns no game world: a [`WorldAllocator`] builds world copies and a
//! [`Host`] spawns entities on the host's main thread (the *primary context*).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ format JSON  │   │ format JSON  │   │ catalog JSON │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Engine                                                           │
//! │  - FormatRegistry (validated catalog)                             │
//! │  - InstanceCache  (per-format pools, spiral paste origins)        │
//! │  - HookSet        (cancellable interceptors)                      │
//! │  - player / entity indices                                        │
//! │  - Bus            (broadcast events)                              │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!   WorldAllocator      PrimaryHandle        TaskTracker       │
//!   (spawn_blocking)    (host main thread)   (world release,   │
//!                        Host::spawn_entity   refills, timers) │
//!                                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                   (capacity: Config::bus_capacity)                │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │    engine listener     │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                            SubscriberSet
//!                          (per-sub queues)
//!                        ┌─────────┼─────────┐
//!                        ▼         ▼         ▼
//!                    LogWriter  ClientNotifier  custom
//! ```
//!
//! ### Lifecycle
//! ```text
//! load_format_str ──► FormatLoad hook ──► catalog
//!
//! ensure_warm ──► build_world ──► Uncached ──CacheReady──► Cached
//! checkout    ──► CAS Cached → Activating ──Start──► Active
//!
//! Active {
//!   ├─► enter_room / player_moved ──► room Populated ──► spawn_mob × n
//!   ├─► entity_died / reconcile    ──► alive set shrinks ──► key drop?
//!   │        └─ room empty ──RoomCompletion──► room Complete
//!   ├─► drop_key / pickup_key / use_key (threshold doors)
//!   └─► all required rooms complete ──TotalCompletion──► Completing
//! }
//!
//! dispose ──► despawn mobs ──► destroy_world ──► Disposed (or Failed)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                            |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------------|
//! | **Formats**       | Validated dungeon definitions and catalog documents.         | [`Format`], [`FormatRegistry`]                |
//! | **Instances**     | Pre-warmed pools, exclusive checkout, disposal.              | [`Engine`], [`Instance`], [`Checkout`]        |
//! | **Progression**   | Rooms, mobs, keys and doors.                                 | [`RoomState`], [`MobHandle`], [`KeyUse`]      |
//! | **Interceptors**  | Cancel or rewrite lifecycle transitions.                     | [`Intercept`], [`Verdict`]                    |
//! | **Subscriber API**| Observe engine events (logging, client notifications).      | [`Subscribe`], [`Event`]                      |
//! | **Host seams**    | World copies, entities, client channel payloads.            | [`WorldAllocator`], [`Host`], [`Codec`]       |
//! | **Errors**        | Typed errors with stable labels.                             | [`EngineError`], [`FormatError`]              |
//! | **Configuration** | Cache size, grid spacing, population and pickup policies.   | [`Config`]                                    |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use dungeonvisor::{
//!     Checkout, Config, Engine, EntityId, Format, Host, HostError, Location, PlayerId,
//!     WorldAllocator, WorldError, WorldHandle,
//! };
//!
//! struct Worlds;
//! impl WorldAllocator for Worlds {
//!     fn build_world(&self, f: &Format, at: Location) -> Result<WorldHandle, WorldError> {
//!         Ok(WorldHandle(format!("{}@{}", f.id, at)))
//!     }
//!     fn destroy_world(&self, _w: &WorldHandle) -> Result<(), WorldError> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Server(AtomicU64);
//! impl Host for Server {
//!     fn spawn_entity(&self, _k: &str, _at: Location, _p: &BTreeMap<String, String>) -> Result<EntityId, HostError> {
//!         Ok(EntityId(self.0.fetch_add(1, Ordering::Relaxed)))
//!     }
//!     fn is_alive(&self, _e: EntityId) -> bool { true }
//!     fn despawn(&self, _e: EntityId) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (engine, driver) = Engine::builder(Config::default(), Arc::new(Worlds), Arc::new(Server::default()))
//!         .build()?;
//!     let _primary = driver.spawn_thread()?;
//!
//!     engine.load_format_str(r#"{
//!         "id": "sewer-1", "schematic": "sewer.schem",
//!         "rooms": [{"id": "a", "mobs": [{"kind": "zombie", "count": 3}]}]
//!     }"#)?;
//!     engine.warm_all().await;
//!
//!     if let Checkout::Granted(inst) = engine.checkout("sewer-1", vec![PlayerId::random()]).await? {
//!         println!("instance {} at {}", inst.id(), inst.origin());
//!     }
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
mod codec;
mod core;
mod error;
mod events;
mod format;
mod hooks;
mod host;
mod subscribers;
mod world;

#[cfg(test)]
mod testkit;

// ---- Public re-exports ----

pub use codec::{Codec, JsonCodec};
pub use core::{
    on_primary, CheckoutPolicy, Checkout, Config, Engine, EngineBuilder, GridLayout, Instance,
    InstanceId, InstanceState, KeyPickup, KeyUse, MobHandle, Pickup, PopulationPolicy,
    PrimaryDriver, PrimaryHandle, RemovalReason, RoomState, WarmReport,
};
pub use error::{CodecError, ConfigError, EngineError, FormatError, HostError, WorldError};
pub use events::{Bus, Event, EventKind};
pub use format::{DoorDef, Format, FormatRegistry, KeyDropMode, LoadReport, MobSpawnDef, RoomTemplate};
pub use hooks::{
    CacheReady, Delivery, FormatLoad, HookId, HookSet, Intercept, MobSpawn, RoomCompletion, Start,
    TotalCompletion, Verdict,
};
pub use host::{AnyKind, EntityId, EntityKinds, Host, PlayerId};
pub use subscribers::{ClientNotifier, ClientPayload, ClientSink, Subscribe, SubscriberSet};
pub use world::{Bounds, Location, WorldAllocator, WorldHandle};

// Optional: expose the built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
