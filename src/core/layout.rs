//! # Paste-origin layout.
//!
//! Instances share one world coordinate space and are pasted on a square spiral
//! around the origin, `grid_size` apart:
//! ```text
//!   6 7 8        slot 0 at (0,0), ring 1 = slots 1..=8,
//!   5 0 1        ring 2 = slots 9..=24, ...
//!   4 3 2
//! ```
//! Freed slots are handed out again before the spiral grows (lowest first).

use std::collections::BTreeSet;

use crate::world::Location;

/// Slot allocator over the spiral grid.
#[derive(Debug)]
pub struct GridLayout {
    spacing: f64,
    next: usize,
    free: BTreeSet<usize>,
}

impl GridLayout {
    pub fn new(grid_size: u32) -> Self {
        Self {
            spacing: f64::from(grid_size),
            next: 0,
            free: BTreeSet::new(),
        }
    }

    /// Reserves a slot and returns it with its paste origin.
    pub fn acquire(&mut self) -> (usize, Location) {
        let slot = self.free.pop_first().unwrap_or_else(|| {
            let slot = self.next;
            self.next += 1;
            slot
        });
        (slot, self.origin(slot))
    }

    pub fn release(&mut self, slot: usize) {
        if slot < self.next {
            self.free.insert(slot);
        }
    }

    pub fn origin(&self, slot: usize) -> Location {
        let (x, z) = spiral(slot);
        Location::new(x as f64 * self.spacing, 0.0, z as f64 * self.spacing)
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.next - self.free.len()
    }
}

/// Grid cell of the `slot`-th position of a square spiral.
fn spiral(slot: usize) -> (i64, i64) {
    let n = slot as i64 + 1;
    if n == 1 {
        return (0, 0);
    }
    let k = ((((n as f64).sqrt() - 1.0) / 2.0).ceil()) as i64;
    let side = 2 * k;
    let mut m = (2 * k + 1) * (2 * k + 1);

    if n >= m - side {
        return (k - (m - n), -k);
    }
    m -= side;
    if n >= m - side {
        return (-k, -k + (m - n));
    }
    m -= side;
    if n >= m - side {
        return (-k + (m - n), k);
    }
    (k, k - (m - n - side))
}
