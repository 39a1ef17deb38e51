//! # World coordinates and the world allocator boundary.
//!
//! The engine never touches world folders itself. A [`WorldAllocator`] copies the
//! format's template world (and pastes its schematic) at a given origin, and later
//! deletes the copy again.
//!
//! ## Rules
//! - Both calls are **blocking**; the engine issues them from
//!   `tokio::task::spawn_blocking`, never from the primary context.
//! - A failed build moves the instance to `Failed`; the engine does not retry.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::format::Format;

/// A point in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub const ORIGIN: Location = Location {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Location {
    type Output = Location;

    fn add(self, o: Location) -> Location {
        Location::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Location {
    type Output = Location;

    fn sub(self, o: Location) -> Location {
        Location::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Axis-aligned box, relative to whatever it is attached to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Location,
    pub max: Location,
}

impl Bounds {
    /// Inclusive containment test.
    pub fn contains(&self, p: Location) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// An empty box never contains anything.
    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }
}

/// Opaque handle to one world copy, as named by the allocator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorldHandle(pub String);

impl fmt::Display for WorldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds and destroys world copies for instances.
///
/// Implementations own all filesystem and world-generation I/O.
pub trait WorldAllocator: Send + Sync + 'static {
    /// Creates a playable copy of `format` pasted at `origin`.
    fn build_world(&self, format: &Format, origin: Location) -> Result<WorldHandle, WorldError>;

    /// Deletes a world copy previously returned by [`build_world`](Self::build_world).
    fn destroy_world(&self, world: &WorldHandle) -> Result<(), WorldError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contains_edges() {
        let b = Bounds {
            min: Location::new(0.0, 0.0, 0.0),
            max: Location::new(10.0, 5.0, 10.0),
        };
        assert!(b.contains(Location::new(0.0, 0.0, 0.0)));
        assert!(b.contains(Location::new(10.0, 5.0, 10.0)));
        assert!(!b.contains(Location::new(10.1, 1.0, 1.0)));
        assert!(!b.is_empty());
        assert!(Bounds::default().contains(Location::ORIGIN));
    }

    #[test]
    fn test_location_arithmetic() {
        let a = Location::new(1.0, 2.0, 3.0);
        let b = Location::new(10.0, 0.0, -3.0);
        assert_eq!(a + b, Location::new(11.0, 2.0, 0.0));
        assert_eq!((a + b) - b, a);
    }
}
