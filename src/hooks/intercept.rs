//! # Interceptor trait and notification types
//!
//! `Intercept` is the synchronous extension point of the engine. Unlike
//! [`Subscribe`](crate::Subscribe), an interceptor runs **inside** the transition
//! it is told about and may veto it by returning [`Verdict::Cancel`]. The mob spawn
//! notification is also mutable: interceptors can swap the entity kind, move the
//! spawn point or add properties before the entity materializes.
//!
//! ## Delivery
//! Every notification type carries a [`Delivery`] tag:
//! ```text
//! FormatLoad      Any      (caller of Engine::load_format_str)
//! CacheReady      Any      (background build task)
//! Start           Primary
//! RoomCompletion  Primary
//! TotalCompletion Primary
//! MobSpawn        Primary
//! ```
//! Primary-delivered hooks may touch the game world directly.
//!
//! ## Rules
//! - Cancelling aborts only the announced transition; the engine leaves the
//!   instance in its pre-transition state and the transition can be retried.
//! - Interceptors run with no engine lock held; they may call read-only engine
//!   and instance accessors but must not block.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::Instance;
use crate::format::{Format, MobSpawnDef};
use crate::host::PlayerId;
use crate::world::Location;

/// Whether a transition may proceed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verdict {
    #[default]
    Continue,
    Cancel,
}

impl Verdict {
    #[inline]
    pub fn is_cancel(self) -> bool {
        matches!(self, Verdict::Cancel)
    }
}

/// Execution context a notification is delivered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Only on the host's primary thread.
    Primary,
    /// Any thread.
    Any,
}

/// A format passed validation and is about to be registered.
pub struct FormatLoad<'a> {
    pub format: &'a Arc<Format>,
}

impl FormatLoad<'_> {
    pub const DELIVERY: Delivery = Delivery::Any;
}

/// A freshly built instance is about to become `Cached`.
pub struct CacheReady<'a> {
    pub instance: &'a Arc<Instance>,
    pub origin: Location,
}

impl CacheReady<'_> {
    pub const DELIVERY: Delivery = Delivery::Any;
}

/// A checked-out instance is about to become `Active`.
pub struct Start<'a> {
    pub instance: &'a Arc<Instance>,
    pub origin: Location,
    pub players: &'a [PlayerId],
}

impl Start<'_> {
    pub const DELIVERY: Delivery = Delivery::Primary;
}

/// A populated room ran out of mobs and is about to become `Complete`.
pub struct RoomCompletion<'a> {
    pub instance: &'a Arc<Instance>,
    pub room: &'a str,
}

impl RoomCompletion<'_> {
    pub const DELIVERY: Delivery = Delivery::Primary;
}

/// Every required room is complete; the instance is about to wind down.
pub struct TotalCompletion<'a> {
    pub instance: &'a Arc<Instance>,
}

impl TotalCompletion<'_> {
    pub const DELIVERY: Delivery = Delivery::Primary;
}

/// A mob is about to be spawned. `kind`, `location` and `custom` are what the
/// host will receive.
pub struct MobSpawn<'a> {
    pub instance: &'a Arc<Instance>,
    pub room: &'a str,
    pub def: &'a MobSpawnDef,
    pub kind: String,
    pub location: Location,
    pub custom: BTreeMap<String, String>,
}

impl MobSpawn<'_> {
    pub const DELIVERY: Delivery = Delivery::Primary;
}

/// Contract for synchronous interceptors.
///
/// Every method defaults to [`Verdict::Continue`]; implement only what you need.
pub trait Intercept: Send + Sync + 'static {
    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn on_format_load(&self, _ev: &FormatLoad<'_>) -> Verdict {
        Verdict::Continue
    }

    fn on_cache_ready(&self, _ev: &CacheReady<'_>) -> Verdict {
        Verdict::Continue
    }

    fn on_start(&self, _ev: &Start<'_>) -> Verdict {
        Verdict::Continue
    }

    fn on_room_completion(&self, _ev: &RoomCompletion<'_>) -> Verdict {
        Verdict::Continue
    }

    fn on_total_completion(&self, _ev: &TotalCompletion<'_>) -> Verdict {
        Verdict::Continue
    }

    fn on_mob_spawn(&self, _ev: &mut MobSpawn<'_>) -> Verdict {
        Verdict::Continue
    }
}
