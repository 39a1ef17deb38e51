//! # Event subscribers for the dungeonvisor engine.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! the built-in subscribers for events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Engine ── publish(Event) ──► Bus ──► engine listener ──► SubscriberSet::emit
//!                                                              │
//!                                              ┌───────────────┼───────────────┐
//!                                              ▼               ▼               ▼
//!                                          LogWriter     ClientNotifier     Custom
//! ```
//!
//! ## Built-in subscribers
//! - [`LogWriter`] renders events through `tracing` (feature `logging`).
//! - [`ClientNotifier`] pushes key counts and completion to party members.

mod client;
#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

pub use client::{ClientNotifier, ClientPayload, ClientSink};
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
