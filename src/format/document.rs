//! # Format documents.
//!
//! Two document shapes are accepted:
//! ```text
//! single : { "id": "sewer-1", "schematic": ..., "rooms": [...], ... }
//! catalog: { "dungeons": [ {format}, {format}, ... ] }
//! ```
//! Catalog entries are decoded one by one, so a malformed entry only rejects
//! itself.

use serde::Deserialize;

use crate::error::FormatError;

use super::model::Format;

#[derive(Deserialize)]
struct Catalog {
    dungeons: Vec<serde_json::Value>,
}

/// Decodes a single-format document.
pub(crate) fn parse_format(src: &str) -> Result<Format, FormatError> {
    Ok(serde_json::from_str(src)?)
}

/// Decodes a catalog document; the outer `Err` means the catalog itself is unreadable.
pub(crate) fn parse_catalog(src: &str) -> Result<Vec<Result<Format, FormatError>>, FormatError> {
    let catalog: Catalog = serde_json::from_str(src)?;
    Ok(catalog
        .dungeons
        .into_iter()
        .map(|entry| serde_json::from_value::<Format>(entry).map_err(FormatError::from))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_isolates_bad_entries() {
        let entries = parse_catalog(
            r#"{"dungeons":[
                {"id":"a","schematic":"a.schem","rooms":[{"id":"r"}]},
                {"id":"b"},
                {"id":"c","schematic":"c.schem","rooms":[{"id":"r"}]}]}"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_ok());
        assert_eq!(entries[1].as_ref().unwrap_err().as_label(), "format_parse");
        assert_eq!(entries[2].as_ref().unwrap().id, "c");
    }

    #[test]
    fn test_catalog_without_dungeons_is_rejected() {
        let err = parse_catalog(r#"{"formats":[]}"#).unwrap_err();
        assert_eq!(err.as_label(), "format_parse");
    }

    #[test]
    fn test_single_format_syntax_error() {
        assert!(parse_format("{").is_err());
    }
}
