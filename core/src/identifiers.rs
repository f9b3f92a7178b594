//! Position-aligned catalog identifiers.

use serde::{Deserialize, Serialize};

use crate::{ArtifactKind, Result, RetrievalError};

/// Catalog identifiers in index-position order.
///
/// Stored as a JSON array of strings. Entry `i` names the catalog item whose
/// vector sits at index position `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierTable(Vec<String>);

impl IdentifierTable {
    #[must_use]
    pub fn new(identifiers: Vec<String>) -> Self {
        Self(identifiers)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let table: Self = serde_json::from_slice(bytes).map_err(|err| {
            RetrievalError::config(ArtifactKind::Identifiers, format!("invalid JSON: {err}"))
        })?;
        tracing::debug!(count = table.len(), "decoded identifier table");
        Ok(table)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| {
            RetrievalError::config(ArtifactKind::Identifiers, format!("encode failed: {err}"))
        })
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&str> {
        self.0.get(position).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for IdentifierTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn parses_json_array() {
        let table = IdentifierTable::from_json(br#"["imgs/pho.jpg", "imgs/ramen.jpg"]"#).expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1), Some("imgs/ramen.jpg"));
        assert_eq!(table.get(2), None);
    }

    #[test]
    fn duplicates_are_kept() {
        let table = IdentifierTable::from_json(br#"["a", "a", "b"]"#).expect("parse");
        assert_eq!(table.iter().collect::<Vec<_>>(), vec!["a", "a", "b"]);
    }

    #[test]
    fn json_round_trip() {
        let table: IdentifierTable = ["x", "y", "z"].into_iter().collect();
        let parsed = IdentifierTable::from_json(&table.to_json().expect("encode")).expect("parse");
        assert_eq!(parsed, table);
    }

    #[test]
    fn non_array_is_config_error() {
        let err = IdentifierTable::from_json(br#"{"ids": []}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.artifact(), Some(ArtifactKind::Identifiers));

        assert!(IdentifierTable::from_json(b"[1, 2]").is_err());
    }
}
