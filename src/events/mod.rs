//! Engine events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the format catalog, the instance cache,
//! the room/key/mob machinery and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload snapshot
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Engine` operations, background build/disposal tasks,
//!   `SubscriberSet` (overflow/panic).
//! - **Consumers**: the engine listener (fans out to `SubscriberSet`) and any
//!   receiver obtained through `Engine::subscribe()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
