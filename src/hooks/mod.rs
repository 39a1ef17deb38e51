//! Typed, cancellable interceptors.
//!
//! Lifecycle boundaries announce themselves twice:
//! ```text
//! transition ─► HookSet::fire (sync, may Cancel / mutate) ─► state change ─► Bus (plain Event)
//! ```
//! Interceptors decide; subscribers observe.
//!
//! ## Contents
//! - [`Intercept`] trait, [`Verdict`], [`Delivery`]
//! - notification types: [`FormatLoad`], [`CacheReady`], [`Start`],
//!   [`RoomCompletion`], [`TotalCompletion`], [`MobSpawn`]
//! - [`HookSet`], [`HookId`]

mod intercept;
mod set;

pub use intercept::{
    CacheReady, Delivery, FormatLoad, Intercept, MobSpawn, RoomCompletion, Start, TotalCompletion,
    Verdict,
};
pub use set::{HookId, HookSet};
