//! # FormatRegistry: the in-memory format catalog.
//!
//! ```text
//! source ─► parse ─► validate ─► (caller gate) ─► insert ─► catalog
//!             │          │
//!             └──────────┴──► FormatError (nothing registered)
//! ```
//!
//! ## Rules
//! - A format is registered whole or not at all.
//! - Inserting an existing id replaces the entry; the old `Arc<Format>` is
//!   returned so the caller can retire instances built from it.
//! - No filesystem access; the registry only sees document text.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, FormatError};
use crate::host::EntityKinds;

use super::document::{parse_catalog, parse_format};
use super::model::Format;
use super::validate::validate;

/// Outcome of loading a catalog document.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<Arc<Format>>,
    pub rejected: Vec<FormatError>,
}

/// Catalog of validated formats.
pub struct FormatRegistry {
    formats: RwLock<HashMap<String, Arc<Format>>>,
    kinds: Arc<dyn EntityKinds>,
}

impl FormatRegistry {
    pub fn new(kinds: Arc<dyn EntityKinds>) -> Self {
        Self {
            formats: RwLock::new(HashMap::new()),
            kinds,
        }
    }

    /// Parses and validates a single-format document without registering it.
    pub fn prepare(&self, src: &str) -> Result<Format, FormatError> {
        let format = parse_format(src)?;
        validate(&format, self.kinds.as_ref())?;
        Ok(format)
    }

    /// Parses and validates every entry of a catalog document without registering them.
    pub fn prepare_catalog(&self, src: &str) -> Result<Vec<Result<Format, FormatError>>, FormatError> {
        Ok(parse_catalog(src)?
            .into_iter()
            .map(|entry| {
                let format = entry?;
                validate(&format, self.kinds.as_ref())?;
                Ok(format)
            })
            .collect())
    }

    /// Registers an already validated format, returning the one it replaced.
    pub fn insert(&self, format: Arc<Format>) -> Option<Arc<Format>> {
        self.formats.write().insert(format.id.clone(), format)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Format>, EngineError> {
        self.formats
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::FormatNotFound { format: id.to_string() })
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Format>> {
        self.formats.write().remove(id)
    }

    /// Sorted list of registered format ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.formats.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
