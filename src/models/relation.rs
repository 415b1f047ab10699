//! Relation types and edge facts.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::models::Category;

/// Typed, directed relationship between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Causes,
    Affects,
    Tests,
    UsesTool,
    Consumes,
    Produces,
    HasSymptom,
    Measures,
    RelatedTo,
    ResolvedBy,
    Prevents,
    DependsOn,
    InteractsWith,
    Detects,
    SameAs,
    HasTag,
    BelongsTo,
    AliasOf,
}

impl RelationType {
    /// Returns a static slice of all relation types.
    pub fn all() -> &'static [RelationType] {
        &[
            RelationType::Causes,
            RelationType::Affects,
            RelationType::Tests,
            RelationType::UsesTool,
            RelationType::Consumes,
            RelationType::Produces,
            RelationType::HasSymptom,
            RelationType::Measures,
            RelationType::RelatedTo,
            RelationType::ResolvedBy,
            RelationType::Prevents,
            RelationType::DependsOn,
            RelationType::InteractsWith,
            RelationType::Detects,
            RelationType::SameAs,
            RelationType::HasTag,
            RelationType::BelongsTo,
            RelationType::AliasOf,
        ]
    }

    /// Relationship type name as stored in the graph.
    ///
    /// Cypher cannot parameterize relationship types, so callers splice
    /// this into the query text; it is always a fixed identifier.
    pub fn as_relationship(&self) -> &'static str {
        match self {
            RelationType::Causes => "CAUSES",
            RelationType::Affects => "AFFECTS",
            RelationType::Tests => "TESTS",
            RelationType::UsesTool => "USES_TOOL",
            RelationType::Consumes => "CONSUMES",
            RelationType::Produces => "PRODUCES",
            RelationType::HasSymptom => "HAS_SYMPTOM",
            RelationType::Measures => "MEASURES",
            RelationType::RelatedTo => "RELATED_TO",
            RelationType::ResolvedBy => "RESOLVED_BY",
            RelationType::Prevents => "PREVENTS",
            RelationType::DependsOn => "DEPENDS_ON",
            RelationType::InteractsWith => "INTERACTS_WITH",
            RelationType::Detects => "DETECTS",
            RelationType::SameAs => "SAME_AS",
            RelationType::HasTag => "HAS_TAG",
            RelationType::BelongsTo => "BELONGS_TO",
            RelationType::AliasOf => "ALIAS_OF",
        }
    }

    /// Attribute-derived edges owned by the upsert writer.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RelationType::HasTag | RelationType::BelongsTo | RelationType::AliasOf
        )
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_relationship())
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', ' '], "_");
        RelationType::all()
            .iter()
            .find(|r| r.as_relationship().eq_ignore_ascii_case(&wanted))
            .copied()
            .ok_or_else(|| format!("Unknown relation type '{}'", s))
    }
}

/// Identity of a canonical Term: `(name, category)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TermKey {
    pub name: String,
    pub category: Category,
}

impl TermKey {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

impl std::fmt::Display for TermKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// Properties carried by a domain edge.
///
/// `None` fields are left untouched on an existing edge, so a partial
/// update never erases what an earlier write recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub inferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    /// Extra caller-supplied properties, stored verbatim.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, JsonValue>,
}

impl EdgeProps {
    /// Flattens the supplied (non-null) properties into a property map.
    pub fn to_property_map(&self) -> Map<String, JsonValue> {
        let mut map = self.extra.clone();
        map.retain(|_, v| !v.is_null());
        map.insert("inferred".to_string(), JsonValue::Bool(self.inferred));
        let mut put = |key: &str, value: Option<JsonValue>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        put("confidence", self.confidence.map(JsonValue::from));
        put("evidence", self.evidence.clone().map(JsonValue::from));
        put("source", self.source.clone().map(JsonValue::from));
        put("rule", self.rule.clone().map(JsonValue::from));
        put(
            "common_tags",
            self.common_tags.clone().map(JsonValue::from),
        );
        put("common_count", self.common_count.map(JsonValue::from));
        put("status", self.status.clone().map(JsonValue::from));
        put("source_hash", self.source_hash.clone().map(JsonValue::from));
        map
    }
}

/// A fully-resolved edge ready for the upsert writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFact {
    pub source: TermKey,
    pub relation: RelationType,
    pub target: TermKey,
    pub props: EdgeProps,
    pub build_id: String,
    /// Leave an existing curated (`inferred=false`) edge untouched when
    /// this write is inferred.
    #[serde(default)]
    pub preserve_curated: bool,
}

/// Endpoint reference as supplied by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub name: String,
    pub category: String,
}

/// A proposed relation, as loosely typed as the files it comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationInput {
    #[serde(rename = "type", alias = "relation_type")]
    pub relation_type: String,
    pub source: NodeRef,
    pub target: NodeRef,
    #[serde(default)]
    pub props: RelationInputProps,
}

/// Properties of a proposed relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationInputProps {
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub inferred: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub common_tags: Option<BTreeSet<String>>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}
