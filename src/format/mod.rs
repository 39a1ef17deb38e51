//! Dungeon formats: data model, documents, validation and the catalog.
//!
//! ## Contents
//! - [`Format`], [`RoomTemplate`], [`MobSpawnDef`], [`DoorDef`], [`KeyDropMode`]
//! - [`FormatRegistry`] validated in-memory catalog
//! - [`LoadReport`] per-entry outcome of a catalog load

mod document;
mod model;
mod registry;
mod validate;

pub use model::{DoorDef, Format, KeyDropMode, MobSpawnDef, RoomTemplate};
pub use registry::{FormatRegistry, LoadReport};
