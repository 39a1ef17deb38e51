//! # Host boundary: players, entities and entity kinds.
//!
//! The [`Host`] is the game server's main simulation. The engine asks it to
//! materialize mobs and later asks whether they still exist. It never holds an
//! owning reference to a host entity: an [`EntityId`] is only a name that the
//! host may stop honoring at any time (despawn, chunk unload, plain kill).
//!
//! ## Rules
//! - `spawn_entity` and `despawn` mutate the world and are only called on the
//!   primary context.
//! - `is_alive` is a read-only liveness query and may be called from anywhere.
//! - `is_alive` returning `false` right after a spawn is valid.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::error::HostError;
use crate::world::Location;

/// Player identity, as assigned by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Random player id (tests and demos).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Non-owning reference to a host entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Game-world mutation surface of the host.
pub trait Host: Send + Sync + 'static {
    /// Materializes an entity of `kind` at `at`, tagged with `props`.
    fn spawn_entity(
        &self,
        kind: &str,
        at: Location,
        props: &BTreeMap<String, String>,
    ) -> Result<EntityId, HostError>;

    /// Whether the entity still exists in the world.
    fn is_alive(&self, entity: EntityId) -> bool;

    /// Removes the entity if it still exists.
    fn despawn(&self, entity: EntityId);
}

/// Resolves entity kind names at format load time.
pub trait EntityKinds: Send + Sync + 'static {
    fn resolves(&self, kind: &str) -> bool;
}

impl<F> EntityKinds for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn resolves(&self, kind: &str) -> bool {
        self(kind)
    }
}

/// Accepts every non-empty kind name.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyKind;

impl EntityKinds for AnyKind {
    fn resolves(&self, kind: &str) -> bool {
        !kind.trim().is_empty()
    }
}
