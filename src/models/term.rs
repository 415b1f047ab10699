//! Term model representing canonical business entities.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::models::{Category, TermKey};

/// A raw record as produced by the document and spreadsheet parsers.
pub type RawRow = Map<String, JsonValue>;

/// A canonical business concept within one category.
///
/// `(name, category)` identifies the term; `canonical_id` is derived from
/// that pair and never changes once assigned.
///
/// `aliases` and `tags` are `None` when the source row did not carry the
/// field at all; the stored sets are then left untouched. `Some` of an
/// empty set clears them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub category: Category,
    pub canonical_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 1.0 for curated vocabulary.
    pub confidence: f64,
}

impl Term {
    pub fn key(&self) -> TermKey {
        TermKey::new(self.name.clone(), self.category)
    }
}

/// A term as read back from the store, with just what inference needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedTerm {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TaggedTerm {
    pub fn key(&self) -> TermKey {
        TermKey::new(self.name.clone(), self.category)
    }
}

/// Content-addressed node id: `<CODE>_<8 hex>` over `label|lower(trim(name))`.
pub fn hashed_id(code: &str, label: &str, name: &str) -> String {
    let key = format!("{}|{}", label, name.trim().to_lowercase());
    let hex = hex::encode_upper(Sha256::digest(key.as_bytes()));
    format!("{}_{}", code, &hex[..8])
}

pub fn tag_canonical_id(name: &str) -> String {
    hashed_id("TAG", "Tag", name)
}

pub fn alias_canonical_id(name: &str) -> String {
    hashed_id("ALS", "Alias", name)
}

/// Generates a new ULID string.
pub fn generate_ulid() -> String {
    Ulid::new().to_string()
}

/// Build id for one run of a job, e.g. `tag-overlap-01J...`.
pub fn new_build_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_ulid().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_node_ids_are_pinned() {
        assert_eq!(tag_canonical_id("显示"), "TAG_0EBE1F3D");
        assert_eq!(tag_canonical_id(" 显示 "), "TAG_0EBE1F3D");
        assert_eq!(alias_canonical_id("LCD"), "ALS_CAD156F8");
        assert_eq!(alias_canonical_id("lcd"), "ALS_CAD156F8");
    }

    #[test]
    fn test_build_id_prefix() {
        let id = new_build_id("ingest");
        assert!(id.starts_with("ingest-"));
        assert_eq!(id.len(), "ingest-".len() + 26);
        assert_eq!(id, id.to_lowercase());
    }
}
