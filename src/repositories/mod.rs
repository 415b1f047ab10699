//! Data access layer for the knowledge graph.
//!
//! Services talk to the store through three narrow traits:
//!
//! - [`TermStore`] - canonical Term nodes and their Category/Tag/Alias links
//! - [`RelationStore`] - domain edges, build inventory and audit queries
//! - [`MaintenanceStore`] - duplicate merge and SAME_AS alignment
//!
//! A [`GraphStore`] runs them in auto-commit mode and opens
//! [`StoreTransaction`]s for chunked writes. Two implementations exist:
//! [`CypherRepository`] over any [`CypherExecutor`](crate::graph::CypherExecutor)
//! (Neo4j in production) and the in-process [`MemoryStore`].

mod maintenance;
mod memory;
mod relation;
mod term;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::AppError;
use crate::graph::{GraphClient, Transaction};
use crate::models::{Category, EdgeFact, TaggedTerm, Term, TermKey};

pub use memory::{EdgeView, MemoryStore};

/// Temporary relationship type used while merging duplicate nodes.
pub const MERGE_PENDING: &str = "MERGE_PENDING";

/// Provenance recorded on attribute links when the Term has no `source`.
pub const DEFAULT_LINK_SOURCE: &str = "term_base";

/// Edge properties the store manages itself; callers cannot set them.
const RESERVED_EDGE_KEYS: &[&str] = &["created_at", "updated_at", "build_id", "last_build_id"];

/// Result of an idempotent node write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Another Term already holds this canonical id (a case variant of the
    /// name); nothing was written.
    IdConflict { holder: String },
}

/// Result of an idempotent edge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOutcome {
    Created,
    Updated,
    /// An existing curated edge was left as is.
    Preserved,
    /// One of the endpoints does not exist; nothing was written.
    MissingEndpoint,
}

/// A node in a duplicate group, addressed by its store id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHandle {
    pub id: String,
    pub created_at: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Nodes of one label sharing `(name, category)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub name: String,
    pub category: Option<String>,
    pub nodes: Vec<NodeHandle>,
}

/// Outcome of turning temporary merge edges back into real ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    /// Edges recreated under their original type.
    pub restored: usize,
    /// Temporary edges folded into an identical edge the survivor already had.
    pub collapsed: usize,
}

/// SAME_AS links made by one alignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignOutcome {
    pub created: usize,
    pub existing: usize,
}

/// Edges carrying one build id, per relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build_id: String,
    pub relation: String,
    pub count: usize,
}

/// Health metrics over the domain edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAudit {
    pub total_edges: usize,
    /// `missing`, `<0.3`, `0.3-0.5`, `0.5-0.8`, `>=0.8`.
    pub confidence_buckets: BTreeMap<String, usize>,
    pub inferred_by_type: BTreeMap<String, usize>,
    /// Parallel edges beyond the first for one `(source, type, target)`.
    pub duplicate_edges: usize,
    /// Terms with no edge to any other Term.
    pub orphan_terms: usize,
    pub pending_merges: usize,
}

/// Canonical Term persistence.
#[async_trait]
pub trait TermStore: Send + Sync {
    /// Locates or creates the Term keyed by `(name, category)` and refreshes
    /// its BELONGS_TO, HAS_TAG and ALIAS_OF links.
    ///
    /// Links created by this call carry `build_id`, `source` and
    /// `confidence = 1.0`. Tag and alias links are only touched when the
    /// Term carries the corresponding set.
    async fn upsert_term(
        &self,
        term: &Term,
        build_id: &str,
        now: &str,
    ) -> Result<WriteOutcome, AppError>;

    async fn find_term(&self, key: &TermKey) -> Result<Option<TaggedTerm>, AppError>;

    async fn terms_in_category(&self, category: Category) -> Result<Vec<TaggedTerm>, AppError>;

    async fn terms_missing_canonical_id(&self) -> Result<Vec<TermKey>, AppError>;

    /// Sets `canonical_id` if absent and fills missing timestamps.
    async fn assign_canonical_id(
        &self,
        key: &TermKey,
        canonical_id: &str,
        now: &str,
    ) -> Result<bool, AppError>;
}

/// Domain edge persistence and inspection.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Merge-by-identity edge write; see [`EdgeOutcome`].
    async fn upsert_edge(&self, edge: &EdgeFact, now: &str) -> Result<EdgeOutcome, AppError>;

    /// Relationship type names linking two Terms, in either direction.
    async fn relations_between(&self, a: &TermKey, b: &TermKey) -> Result<Vec<String>, AppError>;

    async fn delete_edges_by_build_id(&self, build_id: &str) -> Result<usize, AppError>;

    async fn build_summaries(&self) -> Result<Vec<BuildSummary>, AppError>;

    async fn audit_edges(&self) -> Result<EdgeAudit, AppError>;
}

/// Identity-mutating maintenance operations.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    async fn duplicate_groups(&self, label: &str) -> Result<Vec<DuplicateGroup>, AppError>;

    /// Overwrites the survivor's tag and alias lists (non-empty lists only).
    async fn merge_node_sets(
        &self,
        survivor_id: &str,
        tags: &[String],
        aliases: &[String],
        now: &str,
    ) -> Result<(), AppError>;

    /// Phase 1: copies every edge of `duplicate_id` onto `survivor_id` as a
    /// MERGE_PENDING edge. Edges to members of `group_ids` are dropped.
    async fn redirect_edges(
        &self,
        duplicate_id: &str,
        survivor_id: &str,
        group_ids: &[String],
    ) -> Result<usize, AppError>;

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize, AppError>;

    /// Phase 2: replaces every MERGE_PENDING edge with an edge of its
    /// original type.
    async fn restore_pending_edges(&self, now: &str) -> Result<RestoreOutcome, AppError>;

    /// Links business nodes labelled `category` (not Terms) to the Term of
    /// the same name.
    async fn align_same_as(
        &self,
        category: Category,
        build_id: &str,
        now: &str,
    ) -> Result<AlignOutcome, AppError>;
}

/// Everything a service can do against the store.
pub trait StoreOps: TermStore + RelationStore + MaintenanceStore {}

impl<T: TermStore + RelationStore + MaintenanceStore + ?Sized> StoreOps for T {}

/// A unit of work over the store.
#[async_trait]
pub trait StoreTransaction: TermStore + RelationStore + MaintenanceStore {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// A store that can open transactions.
#[async_trait]
pub trait GraphStore: TermStore + RelationStore + MaintenanceStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, AppError>;
}

/// Shared store handle injected into services.
pub type AppStore = Arc<dyn GraphStore>;

/// Store implementation issuing Cypher through any executor.
///
/// Wrapping a [`GraphClient`] gives a [`GraphStore`]; wrapping one of its
/// transactions gives a [`StoreTransaction`].
pub struct CypherRepository<E> {
    executor: E,
}

impl<E> CypherRepository<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

#[async_trait]
impl<C: GraphClient> GraphStore for CypherRepository<C> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, AppError> {
        let txn = self.executor.begin().await?;
        Ok(Box::new(CypherRepository::new(txn)))
    }
}

#[async_trait]
impl<T: Transaction + crate::graph::CypherExecutor> StoreTransaction for CypherRepository<T> {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.executor.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.executor.rollback().await
    }
}

/// Property map written for an edge, minus store-managed keys.
pub(crate) fn edge_property_map(edge: &EdgeFact) -> Map<String, JsonValue> {
    let mut props = edge.props.to_property_map();
    for key in RESERVED_EDGE_KEYS {
        props.remove(*key);
    }
    props
}

/// Whether an inferred write must leave an existing edge alone.
pub(crate) fn preserves_existing(edge: &EdgeFact, existing_inferred: Option<bool>) -> bool {
    edge.preserve_curated && edge.props.inferred && existing_inferred == Some(false)
}

/// Confidence bucket label used by the audit.
pub(crate) fn confidence_bucket(confidence: Option<f64>) -> &'static str {
    match confidence {
        None => "missing",
        Some(c) if c < 0.3 => "<0.3",
        Some(c) if c < 0.5 => "0.3-0.5",
        Some(c) if c < 0.8 => "0.5-0.8",
        Some(_) => ">=0.8",
    }
}

/// Checks that `name` can be spliced into Cypher as a label or type.
pub(crate) fn checked_identifier(name: &str) -> Result<&str, AppError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(AppError::Validation(format!(
            "'{}' is not a valid label or relationship type",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeProps, RelationType};

    fn edge(inferred: bool, preserve_curated: bool) -> EdgeFact {
        EdgeFact {
            source: TermKey::new("t", Category::TestCase),
            relation: RelationType::RelatedTo,
            target: TermKey::new("m", Category::Metric),
            props: EdgeProps {
                inferred,
                ..Default::default()
            },
            build_id: "b".to_string(),
            preserve_curated,
        }
    }

    #[test]
    fn test_checked_identifier() {
        assert!(checked_identifier("Term").is_ok());
        assert!(checked_identifier("HAS_TAG").is_ok());
        assert!(checked_identifier("Term`) DETACH DELETE (n").is_err());
        assert!(checked_identifier("1abc").is_err());
        assert!(checked_identifier("").is_err());
    }

    #[test]
    fn test_reserved_keys_are_stripped() {
        let mut fact = edge(false, false);
        fact.props
            .extra
            .insert("build_id".to_string(), JsonValue::from("spoofed"));
        fact.props
            .extra
            .insert("owner".to_string(), JsonValue::from("qe"));
        let props = edge_property_map(&fact);
        assert!(!props.contains_key("build_id"));
        assert_eq!(props.get("owner"), Some(&JsonValue::from("qe")));
    }

    #[test]
    fn test_only_inferred_writes_defer_to_curated_edges() {
        assert!(preserves_existing(&edge(true, true), Some(false)));
        assert!(!preserves_existing(&edge(true, true), Some(true)));
        assert!(!preserves_existing(&edge(true, true), None));
        assert!(!preserves_existing(&edge(false, true), Some(false)));
        assert!(!preserves_existing(&edge(true, false), Some(false)));
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(confidence_bucket(None), "missing");
        assert_eq!(confidence_bucket(Some(0.1)), "<0.3");
        assert_eq!(confidence_bucket(Some(0.3)), "0.3-0.5");
        assert_eq!(confidence_bucket(Some(0.75)), "0.5-0.8");
        assert_eq!(confidence_bucket(Some(0.8)), ">=0.8");
    }
}
