//! Key derivation and normalization of raw rows into canonical Terms.
//!
//! The canonical id is content-addressed: any process, on any rerun, derives
//! the same id for the same `(category, name)` without coordination.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::context::Context;
use crate::di::FromContext;
use crate::models::{hashed_id, Category, RawRow, SchemaConfig, Term};

const NAME_FIELDS: &[&str] = &["name", "term"];
const CATEGORY_FIELDS: &[&str] = &["category", "label", "type"];
const DESCRIPTION_FIELDS: &[&str] = &["description", "definition"];
const ALIAS_FIELDS: &[&str] = &["aliases", "alias", "synonyms"];
const TAG_FIELDS: &[&str] = &["tags", "tag"];
const LIST_DELIMITERS: &[char] = &[',', ';', '，', '；', '|', '、'];

/// Why a raw row could not become a Term.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedFact {
    #[error("missing name")]
    MissingName,

    #[error("missing category")]
    MissingCategory,

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("confidence '{0}' is not a number")]
    InvalidConfidence(String),

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Trims a name. The stored name keeps its case; only the key folds it.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_string()
}

/// Deterministic id for a Term: `<CODE>_<8 hex>` over `Label|lowercased name`.
///
/// Names differing only in case share an id, so the store refuses the
/// second spelling rather than holding two Terms with one id.
pub fn canonical_id(category: Category, name: &str) -> String {
    hashed_id(category.code(), category.label(), name)
}

/// Collapses a list-valued field into a set of trimmed, non-empty strings.
///
/// Accepts a JSON array (elements may themselves be delimited strings) or a
/// single string split on the usual ASCII and full-width delimiters.
pub fn split_list(value: &JsonValue) -> BTreeSet<String> {
    match value {
        JsonValue::Array(items) => items.iter().flat_map(split_list).collect(),
        JsonValue::String(s) => s
            .split(LIST_DELIMITERS)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        JsonValue::Number(n) => BTreeSet::from([n.to_string()]),
        _ => BTreeSet::new(),
    }
}

/// Turns raw rows into [`Term`]s using the configured vocabulary.
#[derive(FromContext, Clone)]
pub struct Canonicalizer {
    schema: Arc<SchemaConfig>,
}

impl Canonicalizer {
    pub fn new(schema: Arc<SchemaConfig>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    /// Normalizes one row. Extra fields are ignored.
    pub fn canonicalize(&self, row: &RawRow) -> Result<Term, MalformedFact> {
        let name = first_text(row, NAME_FIELDS)
            .map(|s| normalize_name(&s))
            .filter(|s| !s.is_empty())
            .ok_or(MalformedFact::MissingName)?;

        let raw_category = first_text(row, CATEGORY_FIELDS).ok_or(MalformedFact::MissingCategory)?;
        let category = self
            .schema
            .resolve_category(&raw_category)
            .ok_or(MalformedFact::UnknownCategory(raw_category))?;

        let confidence = match row.get("confidence") {
            None | Some(JsonValue::Null) => 1.0,
            Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(1.0),
            Some(JsonValue::String(s)) if s.trim().is_empty() => 1.0,
            Some(JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| MalformedFact::InvalidConfidence(s.clone()))?,
            Some(other) => return Err(MalformedFact::InvalidConfidence(other.to_string())),
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(MalformedFact::ConfidenceOutOfRange(confidence));
        }

        let mut aliases = first_list(row, ALIAS_FIELDS);
        if let Some(aliases) = aliases.as_mut() {
            aliases.remove(&name);
        }

        Ok(Term {
            canonical_id: canonical_id(category, &name),
            name,
            category,
            aliases,
            tags: first_list(row, TAG_FIELDS),
            description: first_text(row, DESCRIPTION_FIELDS),
            source: first_text(row, &["source"]),
            confidence,
        })
    }
}

/// First non-empty scalar among `keys`, as trimmed text.
fn first_text(row: &RawRow, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match row.get(*key)? {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First non-empty list among `keys`.
///
/// `None` when the row carries none of the keys (or only nulls), so the
/// stored set is kept; `Some` of an empty set when a key is present but
/// holds nothing.
fn first_list(row: &RawRow, keys: &[&str]) -> Option<BTreeSet<String>> {
    let mut present = keys
        .iter()
        .filter_map(|key| row.get(*key))
        .filter(|value| !value.is_null())
        .map(split_list)
        .peekable();
    present.peek()?;
    Some(present.find(|set| !set.is_empty()).unwrap_or_default())
}
