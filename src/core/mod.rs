//! Engine core: instances, cache, rooms, mobs, keys and the primary context.
//!
//! The public entry point is [`Engine`], built by [`EngineBuilder`].
//!
//! Internal modules:
//! - [`instance`]: instance identity and the atomic lifecycle state;
//! - [`cache`]: per-format pools, world builds and checkout;
//! - [`room`]: room population and completion;
//! - [`mobs`]: spawned mob tracking, deaths and reconciliation;
//! - [`keys`]: key drops, pickups and door unlocks;
//! - [`layout`]: spiral paste-origin allocation;
//! - [`primary`]: job queue onto the host's main thread;
//! - [`engine`]: catalog, player index, disposal and shutdown.

mod builder;
mod cache;
mod config;
mod engine;
mod instance;
mod keys;
mod layout;
mod mobs;
pub(crate) mod primary;
mod room;

pub use builder::EngineBuilder;
pub use cache::{Checkout, WarmReport};
pub use config::{CheckoutPolicy, Config, KeyPickup, PopulationPolicy};
pub use engine::Engine;
pub use instance::{Instance, InstanceId, InstanceState, RemovalReason};
pub use keys::{KeyUse, Pickup};
pub use layout::GridLayout;
pub use mobs::MobHandle;
pub use primary::{on_primary, PrimaryDriver, PrimaryHandle};
pub use room::RoomState;
