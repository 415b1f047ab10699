//! In-process graph store.
//!
//! Mirrors the Cypher repository's write semantics on a plain property
//! graph held in memory. Used by the test suites and handy for trying a
//! pipeline without a database.
//!
//! Transactions are snapshots with optimistic commits: a commit fails with a
//! retryable transaction error when another transaction committed since the
//! snapshot was taken. Auto-commit writes made while a transaction is open
//! are not tracked and are overwritten by its commit, so pipelines should
//! not mix the two concurrently.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::error::AppError;
use crate::models::{
    alias_canonical_id, tag_canonical_id, Category, EdgeFact, RelationType, TaggedTerm, Term,
    TermKey,
};
use crate::repositories::{
    checked_identifier, confidence_bucket, edge_property_map, preserves_existing, AlignOutcome,
    BuildSummary, DuplicateGroup, EdgeAudit, EdgeOutcome, GraphStore, MaintenanceStore,
    NodeHandle, RelationStore, RestoreOutcome, StoreTransaction, TermStore, WriteOutcome,
    DEFAULT_LINK_SOURCE, MERGE_PENDING,
};

const MERGE_KEYS: &[&str] = &["merge_original_type", "merge_rel", "merge_from"];

#[derive(Debug, Clone)]
struct MemNode {
    labels: BTreeSet<String>,
    props: Map<String, JsonValue>,
}

#[derive(Debug, Clone)]
struct MemEdge {
    rel_type: String,
    from: u64,
    to: u64,
    props: Map<String, JsonValue>,
}

/// Stamp carried by attribute links created during one Term write.
struct Provenance<'a> {
    build_id: &'a str,
    source: &'a str,
    now: &'a str,
}

#[derive(Debug, Clone, Default)]
struct MemGraph {
    /// Bumped on every transaction commit.
    version: u64,
    next_id: u64,
    nodes: BTreeMap<u64, MemNode>,
    edges: BTreeMap<u64, MemEdge>,
}

/// An edge as seen by tests: endpoint names instead of ids.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub source_name: String,
    pub rel_type: String,
    pub target_name: String,
    pub props: Map<String, JsonValue>,
}

/// Property-graph store kept in memory.
///
/// Cloning shares the underlying graph. [`GraphStore::begin`] snapshots
/// the committed graph; commit swaps the snapshot back in.
#[derive(Clone, Default)]
pub struct MemoryStore {
    graph: Arc<Mutex<MemGraph>>,
    parent: Option<Arc<Mutex<MemGraph>>>,
    base_version: u64,
    commit_failures: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` transaction commits fail with a transaction error.
    pub fn fail_next_commits(&self, n: usize) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    /// Inserts a raw node and returns its id.
    pub fn insert_node(&self, labels: &[&str], props: JsonValue) -> String {
        let props = match props {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        self.lock().add_node(labels, props).to_string()
    }

    /// Inserts a raw edge between two node ids and returns its id.
    pub fn insert_edge(&self, from: &str, rel_type: &str, to: &str, props: JsonValue) -> Option<String> {
        let props = match props {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        let mut graph = self.lock();
        let from = graph.node_id(from)?;
        let to = graph.node_id(to)?;
        Some(graph.add_edge(from, rel_type, to, props).to_string())
    }

    /// Every edge of one relationship type, in insertion order.
    pub fn edges_of_type(&self, rel_type: &str) -> Vec<EdgeView> {
        let graph = self.lock();
        graph
            .edges
            .values()
            .filter(|e| e.rel_type == rel_type)
            .map(|e| EdgeView {
                source_name: graph.display_name(e.from),
                rel_type: e.rel_type.clone(),
                target_name: graph.display_name(e.to),
                props: e.props.clone(),
            })
            .collect()
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.labels.contains(label))
            .count()
    }

    /// Properties of the Term keyed by `key`.
    pub fn term_props(&self, key: &TermKey) -> Option<Map<String, JsonValue>> {
        let graph = self.lock();
        let id = graph.find_term_id(&key.name, key.category.label())?;
        graph.nodes.get(&id).map(|n| n.props.clone())
    }

    /// Labels carried by the Term keyed by `key`.
    pub fn term_labels(&self, key: &TermKey) -> Option<BTreeSet<String>> {
        let graph = self.lock();
        let id = graph.find_term_id(&key.name, key.category.label())?;
        graph.nodes.get(&id).map(|n| n.labels.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemGraph {
    fn node_id(&self, id: &str) -> Option<u64> {
        id.parse::<u64>().ok().filter(|id| self.nodes.contains_key(id))
    }

    fn add_node(&mut self, labels: &[&str], props: Map<String, JsonValue>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.nodes.insert(
            id,
            MemNode {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                props,
            },
        );
        id
    }

    fn add_edge(&mut self, from: u64, rel_type: &str, to: u64, props: Map<String, JsonValue>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.edges.insert(
            id,
            MemEdge {
                rel_type: rel_type.to_string(),
                from,
                to,
                props,
            },
        );
        id
    }

    fn display_name(&self, id: u64) -> String {
        self.nodes
            .get(&id)
            .and_then(|n| str_prop(&n.props, "name").or_else(|| str_prop(&n.props, "term")))
            .unwrap_or_default()
            .to_string()
    }

    fn find_term_id(&self, name: &str, category: &str) -> Option<u64> {
        self.nodes.iter().find_map(|(id, n)| {
            (n.labels.contains("Term")
                && str_prop(&n.props, "name") == Some(name)
                && str_prop(&n.props, "category") == Some(category))
            .then_some(*id)
        })
    }

    fn find_edge(&self, from: u64, rel_type: &str, to: u64) -> Option<u64> {
        self.edges.iter().find_map(|(id, e)| {
            (e.from == from && e.to == to && e.rel_type == rel_type).then_some(*id)
        })
    }

    /// Finds or creates the node of `label` named `name`, filling in
    /// `canonical_id` when it is missing.
    fn merge_named_node(&mut self, label: &str, name: &str, canonical_id: &str, now: &str) -> (u64, bool) {
        let found = self.nodes.iter().find_map(|(id, n)| {
            (n.labels.contains(label) && str_prop(&n.props, "name") == Some(name)).then_some(*id)
        });
        let (id, created) = match found {
            Some(id) => (id, false),
            None => {
                let mut props = Map::new();
                props.insert("name".to_string(), JsonValue::from(name));
                props.insert("created_at".to_string(), JsonValue::from(now));
                (self.add_node(&[label], props), true)
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.props.get("canonical_id").map_or(true, JsonValue::is_null) {
                node.props
                    .insert("canonical_id".to_string(), JsonValue::from(canonical_id));
            }
        }
        (id, created)
    }

    /// Creates an attribute link once, stamped with the build that made it.
    fn merge_link(&mut self, from: u64, rel_type: &str, to: u64, provenance: &Provenance<'_>) {
        if self.find_edge(from, rel_type, to).is_none() {
            let mut props = Map::new();
            props.insert("created_at".to_string(), JsonValue::from(provenance.now));
            props.insert("build_id".to_string(), JsonValue::from(provenance.build_id));
            props.insert("source".to_string(), JsonValue::from(provenance.source));
            props.insert("confidence".to_string(), JsonValue::from(1.0));
            self.add_edge(from, rel_type, to, props);
        }
    }

    fn has_label(&self, id: u64, label: &str) -> bool {
        self.nodes
            .get(&id)
            .map(|n| n.labels.contains(label))
            .unwrap_or(false)
    }

    /// Term holding `canonical_id` under a different `(name, category)`.
    fn canonical_id_holder(&self, term: &Term) -> Option<String> {
        self.nodes.values().find_map(|n| {
            let holds = n.labels.contains("Term")
                && str_prop(&n.props, "canonical_id") == Some(term.canonical_id.as_str())
                && (str_prop(&n.props, "name") != Some(term.name.as_str())
                    || str_prop(&n.props, "category") != Some(term.category.label()));
            holds
                .then(|| str_prop(&n.props, "name"))
                .flatten()
                .map(str::to_string)
        })
    }

    fn upsert_term(&mut self, term: &Term, build_id: &str, now: &str) -> WriteOutcome {
        if let Some(holder) = self.canonical_id_holder(term) {
            return WriteOutcome::IdConflict { holder };
        }

        let label = term.category.label();
        let provenance = Provenance {
            build_id,
            source: term.source.as_deref().unwrap_or(DEFAULT_LINK_SOURCE),
            now,
        };
        let (id, outcome) = match self.find_term_id(&term.name, label) {
            Some(id) => (id, WriteOutcome::Updated),
            None => {
                let mut props = Map::new();
                props.insert("name".to_string(), JsonValue::from(term.name.as_str()));
                props.insert("category".to_string(), JsonValue::from(label));
                props.insert("canonical_id".to_string(), JsonValue::from(term.canonical_id.as_str()));
                props.insert("created_at".to_string(), JsonValue::from(now));
                (self.add_node(&["Term"], props), WriteOutcome::Created)
            }
        };

        if let Some(node) = self.nodes.get_mut(&id) {
            node.labels.insert(label.to_string());
            let props = &mut node.props;
            if props.get("canonical_id").map_or(true, JsonValue::is_null) {
                props.insert("canonical_id".to_string(), JsonValue::from(term.canonical_id.as_str()));
            }
            if let Some(tags) = &term.tags {
                props.insert("tags".to_string(), string_list(tags));
            }
            if let Some(aliases) = &term.aliases {
                props.insert("aliases".to_string(), string_list(aliases));
            }
            if let Some(description) = &term.description {
                props.insert("description".to_string(), JsonValue::from(description.as_str()));
            }
            if let Some(source) = &term.source {
                props.insert("source".to_string(), JsonValue::from(source.as_str()));
            }
            props.insert("confidence".to_string(), JsonValue::from(term.confidence));
            if props.get("created_at").map_or(true, JsonValue::is_null) {
                props.insert("created_at".to_string(), JsonValue::from(now));
            }
            props.insert("updated_at".to_string(), JsonValue::from(now));
        }

        let (category, created) =
            self.merge_named_node("Category", label, &term.category.node_canonical_id(), now);
        if created {
            if let Some(node) = self.nodes.get_mut(&category) {
                node.props
                    .insert("code".to_string(), JsonValue::from(term.category.code()));
            }
        }
        self.merge_link(id, "BELONGS_TO", category, &provenance);

        if let Some(tags) = &term.tags {
            let stale: Vec<u64> = self
                .edges
                .iter()
                .filter(|(_, e)| e.from == id && e.rel_type == "HAS_TAG")
                .filter(|(_, e)| !self.named_in(e.to, "Tag", tags))
                .map(|(eid, _)| *eid)
                .collect();
            for eid in stale {
                self.edges.remove(&eid);
            }
            for tag in tags {
                let (tag_id, _) = self.merge_named_node("Tag", tag, &tag_canonical_id(tag), now);
                self.merge_link(id, "HAS_TAG", tag_id, &provenance);
            }
        }

        if let Some(aliases) = &term.aliases {
            let stale: Vec<u64> = self
                .edges
                .iter()
                .filter(|(_, e)| e.to == id && e.rel_type == "ALIAS_OF")
                .filter(|(_, e)| !self.named_in(e.from, "Alias", aliases))
                .map(|(eid, _)| *eid)
                .collect();
            for eid in stale {
                self.edges.remove(&eid);
            }
            for alias in aliases {
                let (alias_id, _) =
                    self.merge_named_node("Alias", alias, &alias_canonical_id(alias), now);
                self.merge_link(alias_id, "ALIAS_OF", id, &provenance);
            }
        }

        outcome
    }

    /// Whether node `id` carries `label` and a name from `names`.
    fn named_in(&self, id: u64, label: &str, names: &BTreeSet<String>) -> bool {
        self.nodes
            .get(&id)
            .filter(|n| n.labels.contains(label))
            .and_then(|n| str_prop(&n.props, "name"))
            .map(|name| names.contains(name))
            .unwrap_or(false)
    }

    fn tagged_term(&self, id: u64, category: Category) -> Option<TaggedTerm> {
        let node = self.nodes.get(&id)?;
        Some(TaggedTerm {
            name: str_prop(&node.props, "name")?.to_string(),
            category,
            tags: string_set(node.props.get("tags")),
        })
    }

    fn upsert_edge(&mut self, edge: &EdgeFact, now: &str) -> EdgeOutcome {
        let source = self.find_term_id(&edge.source.name, edge.source.category.label());
        let target = self.find_term_id(&edge.target.name, edge.target.category.label());
        let (Some(source), Some(target)) = (source, target) else {
            return EdgeOutcome::MissingEndpoint;
        };

        let rel = edge.relation.as_relationship();
        let existing = self.find_edge(source, rel, target);
        let existing_inferred = existing
            .and_then(|id| self.edges.get(&id))
            .and_then(|e| e.props.get("inferred"))
            .and_then(JsonValue::as_bool);
        if preserves_existing(edge, existing_inferred) {
            return EdgeOutcome::Preserved;
        }

        let (id, outcome) = match existing {
            Some(id) => (id, EdgeOutcome::Updated),
            None => {
                let mut props = Map::new();
                props.insert("created_at".to_string(), JsonValue::from(now));
                props.insert("build_id".to_string(), JsonValue::from(edge.build_id.as_str()));
                (self.add_edge(source, rel, target, props), EdgeOutcome::Created)
            }
        };
        if let Some(stored) = self.edges.get_mut(&id) {
            stored.props.extend(edge_property_map(edge));
            stored
                .props
                .insert("updated_at".to_string(), JsonValue::from(now));
            stored.props.insert(
                "last_build_id".to_string(),
                JsonValue::from(edge.build_id.as_str()),
            );
        }
        outcome
    }

    fn audit_edges(&self) -> EdgeAudit {
        let skipped: HashSet<&str> = RelationType::all()
            .iter()
            .filter(|r| r.is_structural())
            .map(|r| r.as_relationship())
            .chain(std::iter::once(MERGE_PENDING))
            .collect();

        let mut audit = EdgeAudit::default();
        for edge in self.edges.values() {
            if !self.has_label(edge.from, "Term")
                || !self.has_label(edge.to, "Term")
                || skipped.contains(edge.rel_type.as_str())
            {
                continue;
            }
            audit.total_edges += 1;
            let bucket = confidence_bucket(edge.props.get("confidence").and_then(JsonValue::as_f64));
            *audit
                .confidence_buckets
                .entry(bucket.to_string())
                .or_default() += 1;
            if edge.props.get("inferred").and_then(JsonValue::as_bool) == Some(true) {
                *audit
                    .inferred_by_type
                    .entry(edge.rel_type.clone())
                    .or_default() += 1;
            }
        }

        let mut parallel: BTreeMap<(u64, &str, u64), usize> = BTreeMap::new();
        for edge in self.edges.values() {
            *parallel
                .entry((edge.from, edge.rel_type.as_str(), edge.to))
                .or_default() += 1;
        }
        audit.duplicate_edges = parallel.values().map(|n| n.saturating_sub(1)).sum();

        audit.orphan_terms = self
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains("Term"))
            .filter(|(id, _)| {
                !self.edges.values().any(|e| {
                    (e.from == **id && self.has_label(e.to, "Term"))
                        || (e.to == **id && self.has_label(e.from, "Term"))
                })
            })
            .count();

        audit.pending_merges = self
            .edges
            .values()
            .filter(|e| e.rel_type == MERGE_PENDING)
            .count();

        audit
    }

    fn duplicate_groups(&self, label: &str) -> Vec<DuplicateGroup> {
        let mut groups: BTreeMap<(String, Option<String>), Vec<NodeHandle>> = BTreeMap::new();
        for (id, node) in &self.nodes {
            if !node.labels.contains(label) {
                continue;
            }
            let Some(name) = str_prop(&node.props, "name") else {
                continue;
            };
            let category = str_prop(&node.props, "category").map(str::to_string);
            let created_at = match node.props.get("created_at") {
                None | Some(JsonValue::Null) => None,
                Some(JsonValue::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            groups
                .entry((name.to_string(), category))
                .or_default()
                .push(NodeHandle {
                    id: id.to_string(),
                    created_at,
                    tags: string_set(node.props.get("tags")).into_iter().collect(),
                    aliases: string_set(node.props.get("aliases")).into_iter().collect(),
                });
        }

        groups
            .into_iter()
            .filter(|(_, nodes)| nodes.len() > 1)
            .map(|((name, category), nodes)| DuplicateGroup {
                name,
                category,
                nodes,
            })
            .collect()
    }

    fn redirect_edges(&mut self, duplicate_id: &str, survivor_id: &str, group_ids: &[String]) -> usize {
        let (Some(duplicate), Some(survivor)) = (self.node_id(duplicate_id), self.node_id(survivor_id))
        else {
            return 0;
        };
        let group: HashSet<u64> = group_ids.iter().filter_map(|id| id.parse().ok()).collect();

        let moves: Vec<(u64, u64, u64, MemEdge)> = self
            .edges
            .iter()
            .filter(|(_, e)| e.rel_type != MERGE_PENDING)
            .filter_map(|(eid, e)| {
                if e.from == duplicate && !group.contains(&e.to) {
                    Some((*eid, survivor, e.to, e.clone()))
                } else if e.to == duplicate && !group.contains(&e.from) {
                    Some((*eid, e.from, survivor, e.clone()))
                } else {
                    None
                }
            })
            .collect();

        for (eid, from, to, original) in &moves {
            let merge_rel = JsonValue::from(eid.to_string());
            let pending = self.edges.iter().find_map(|(pid, p)| {
                (p.rel_type == MERGE_PENDING
                    && p.from == *from
                    && p.to == *to
                    && p.props.get("merge_rel") == Some(&merge_rel))
                .then_some(*pid)
            });
            let pid = match pending {
                Some(pid) => pid,
                None => {
                    let mut props = Map::new();
                    props.insert("merge_rel".to_string(), merge_rel);
                    self.add_edge(*from, MERGE_PENDING, *to, props)
                }
            };
            if let Some(p) = self.edges.get_mut(&pid) {
                p.props.extend(original.props.clone());
                p.props.insert(
                    "merge_original_type".to_string(),
                    JsonValue::from(original.rel_type.as_str()),
                );
                p.props
                    .insert("merge_from".to_string(), JsonValue::from(duplicate_id));
            }
        }

        moves.len()
    }

    fn delete_nodes(&mut self, ids: &[String]) -> usize {
        let doomed: HashSet<u64> = ids.iter().filter_map(|id| self.node_id(id)).collect();
        self.edges
            .retain(|_, e| !doomed.contains(&e.from) && !doomed.contains(&e.to));
        self.nodes.retain(|id, _| !doomed.contains(id));
        doomed.len()
    }

    fn restore_pending_edges(&mut self, now: &str) -> RestoreOutcome {
        let pending: Vec<(u64, MemEdge)> = self
            .edges
            .iter()
            .filter(|(_, e)| e.rel_type == MERGE_PENDING)
            .filter(|(_, e)| str_prop(&e.props, "merge_original_type").is_some())
            .map(|(id, e)| (*id, e.clone()))
            .collect();

        let mut outcome = RestoreOutcome::default();
        for (pid, p) in pending {
            let Some(rel_type) = str_prop(&p.props, "merge_original_type") else {
                continue;
            };
            let target = match self.find_edge(p.from, rel_type, p.to) {
                Some(existing) => {
                    outcome.collapsed += 1;
                    existing
                }
                None => {
                    outcome.restored += 1;
                    self.add_edge(p.from, rel_type, p.to, p.props.clone())
                }
            };
            if let Some(edge) = self.edges.get_mut(&target) {
                edge.props
                    .insert("updated_at".to_string(), JsonValue::from(now));
                for key in MERGE_KEYS {
                    edge.props.remove(*key);
                }
            }
            self.edges.remove(&pid);
        }
        outcome
    }

    fn align_same_as(&mut self, category: Category, build_id: &str, now: &str) -> AlignOutcome {
        let label = category.label();
        let terms: Vec<(u64, String)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains("Term") && str_prop(&n.props, "category") == Some(label))
            .filter_map(|(id, n)| Some((*id, str_prop(&n.props, "name")?.to_string())))
            .collect();
        let business: Vec<(u64, String)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(label) && !n.labels.contains("Term"))
            .filter_map(|(id, n)| {
                let name = str_prop(&n.props, "name").or_else(|| str_prop(&n.props, "term"))?;
                Some((*id, name.to_string()))
            })
            .collect();

        let mut outcome = AlignOutcome::default();
        for (term_id, term_name) in &terms {
            for (node_id, _) in business.iter().filter(|(_, name)| name == term_name) {
                let edge_id = match self.find_edge(*node_id, "SAME_AS", *term_id) {
                    Some(id) => id,
                    None => {
                        let mut props = Map::new();
                        props.insert("source".to_string(), JsonValue::from("term_base"));
                        props.insert("build_id".to_string(), JsonValue::from(build_id));
                        props.insert("created_at".to_string(), JsonValue::from(now));
                        props.insert("confidence".to_string(), JsonValue::from(1.0));
                        props.insert("inferred".to_string(), JsonValue::Bool(false));
                        self.add_edge(*node_id, "SAME_AS", *term_id, props)
                    }
                };
                if let Some(edge) = self.edges.get_mut(&edge_id) {
                    edge.props
                        .insert("updated_at".to_string(), JsonValue::from(now));
                    if str_prop(&edge.props, "build_id") == Some(build_id) {
                        outcome.created += 1;
                    } else {
                        outcome.existing += 1;
                    }
                }
            }
        }
        outcome
    }
}

fn str_prop<'a>(props: &'a Map<String, JsonValue>, key: &str) -> Option<&'a str> {
    props.get(key).and_then(JsonValue::as_str)
}

fn string_list(values: &BTreeSet<String>) -> JsonValue {
    JsonValue::Array(values.iter().map(|v| JsonValue::from(v.as_str())).collect())
}

fn string_set(value: Option<&JsonValue>) -> BTreeSet<String> {
    value
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl TermStore for MemoryStore {
    async fn upsert_term(
        &self,
        term: &Term,
        build_id: &str,
        now: &str,
    ) -> Result<WriteOutcome, AppError> {
        Ok(self.lock().upsert_term(term, build_id, now))
    }

    async fn find_term(&self, key: &TermKey) -> Result<Option<TaggedTerm>, AppError> {
        let graph = self.lock();
        Ok(graph
            .find_term_id(&key.name, key.category.label())
            .and_then(|id| graph.tagged_term(id, key.category)))
    }

    async fn terms_in_category(&self, category: Category) -> Result<Vec<TaggedTerm>, AppError> {
        let graph = self.lock();
        let mut terms: Vec<TaggedTerm> = graph
            .nodes
            .iter()
            .filter(|(_, n)| {
                n.labels.contains("Term") && str_prop(&n.props, "category") == Some(category.label())
            })
            .filter_map(|(id, _)| graph.tagged_term(*id, category))
            .collect();
        terms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(terms)
    }

    async fn terms_missing_canonical_id(&self) -> Result<Vec<TermKey>, AppError> {
        let graph = self.lock();
        let mut keys: Vec<TermKey> = graph
            .nodes
            .values()
            .filter(|n| n.labels.contains("Term"))
            .filter(|n| n.props.get("canonical_id").map_or(true, JsonValue::is_null))
            .filter_map(|n| {
                let label = str_prop(&n.props, "category")?;
                let category = Category::all().iter().find(|c| c.label() == label)?;
                Some(TermKey::new(str_prop(&n.props, "name")?, *category))
            })
            .collect();
        keys.sort_by(|a, b| {
            (a.category.label(), &a.name).cmp(&(b.category.label(), &b.name))
        });
        Ok(keys)
    }

    async fn assign_canonical_id(
        &self,
        key: &TermKey,
        canonical_id: &str,
        now: &str,
    ) -> Result<bool, AppError> {
        let mut graph = self.lock();
        let Some(id) = graph.find_term_id(&key.name, key.category.label()) else {
            return Ok(false);
        };
        let Some(node) = graph.nodes.get_mut(&id) else {
            return Ok(false);
        };
        if !node.props.get("canonical_id").map_or(true, JsonValue::is_null) {
            return Ok(false);
        }
        node.props
            .insert("canonical_id".to_string(), JsonValue::from(canonical_id));
        for key in ["created_at", "updated_at"] {
            if node.props.get(key).map_or(true, JsonValue::is_null) {
                node.props.insert(key.to_string(), JsonValue::from(now));
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn upsert_edge(&self, edge: &EdgeFact, now: &str) -> Result<EdgeOutcome, AppError> {
        Ok(self.lock().upsert_edge(edge, now))
    }

    async fn relations_between(&self, a: &TermKey, b: &TermKey) -> Result<Vec<String>, AppError> {
        let graph = self.lock();
        let (Some(a), Some(b)) = (
            graph.find_term_id(&a.name, a.category.label()),
            graph.find_term_id(&b.name, b.category.label()),
        ) else {
            return Ok(Vec::new());
        };
        let types: BTreeSet<String> = graph
            .edges
            .values()
            .filter(|e| (e.from == a && e.to == b) || (e.from == b && e.to == a))
            .map(|e| e.rel_type.clone())
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn delete_edges_by_build_id(&self, build_id: &str) -> Result<usize, AppError> {
        let mut graph = self.lock();
        let before = graph.edges.len();
        graph
            .edges
            .retain(|_, e| str_prop(&e.props, "build_id") != Some(build_id));
        Ok(before - graph.edges.len())
    }

    async fn build_summaries(&self) -> Result<Vec<BuildSummary>, AppError> {
        let graph = self.lock();
        let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
        for edge in graph.edges.values() {
            if let Some(build_id) = str_prop(&edge.props, "build_id") {
                *counts
                    .entry((build_id.to_string(), edge.rel_type.clone()))
                    .or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|((build_id, relation), count)| BuildSummary {
                build_id,
                relation,
                count,
            })
            .collect())
    }

    async fn audit_edges(&self) -> Result<EdgeAudit, AppError> {
        Ok(self.lock().audit_edges())
    }
}

#[async_trait]
impl MaintenanceStore for MemoryStore {
    async fn duplicate_groups(&self, label: &str) -> Result<Vec<DuplicateGroup>, AppError> {
        let label = checked_identifier(label)?;
        Ok(self.lock().duplicate_groups(label))
    }

    async fn merge_node_sets(
        &self,
        survivor_id: &str,
        tags: &[String],
        aliases: &[String],
        now: &str,
    ) -> Result<(), AppError> {
        let mut graph = self.lock();
        let Some(id) = graph.node_id(survivor_id) else {
            return Ok(());
        };
        if let Some(node) = graph.nodes.get_mut(&id) {
            if !tags.is_empty() {
                node.props.insert("tags".to_string(), JsonValue::from(tags.to_vec()));
            }
            if !aliases.is_empty() {
                node.props
                    .insert("aliases".to_string(), JsonValue::from(aliases.to_vec()));
            }
            node.props
                .insert("updated_at".to_string(), JsonValue::from(now));
        }
        Ok(())
    }

    async fn redirect_edges(
        &self,
        duplicate_id: &str,
        survivor_id: &str,
        group_ids: &[String],
    ) -> Result<usize, AppError> {
        Ok(self.lock().redirect_edges(duplicate_id, survivor_id, group_ids))
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize, AppError> {
        Ok(self.lock().delete_nodes(ids))
    }

    async fn restore_pending_edges(&self, now: &str) -> Result<RestoreOutcome, AppError> {
        Ok(self.lock().restore_pending_edges(now))
    }

    async fn align_same_as(
        &self,
        category: Category,
        build_id: &str,
        now: &str,
    ) -> Result<AlignOutcome, AppError> {
        Ok(self.lock().align_same_as(category, build_id, now))
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, AppError> {
        let snapshot = self.lock().clone();
        Ok(Box::new(MemoryStore {
            base_version: snapshot.version,
            graph: Arc::new(Mutex::new(snapshot)),
            parent: Some(Arc::clone(&self.graph)),
            commit_failures: Arc::clone(&self.commit_failures),
        }))
    }
}

#[async_trait]
impl StoreTransaction for MemoryStore {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let injected = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AppError::Transaction("injected commit failure".to_string()));
        }
        if let Some(parent) = &self.parent {
            let mut staged = self.lock().clone();
            let mut committed = parent.lock().unwrap_or_else(PoisonError::into_inner);
            if committed.version != self.base_version {
                return Err(AppError::Transaction(
                    "graph changed since the transaction began".to_string(),
                ));
            }
            staged.version = self.base_version + 1;
            *committed = staged;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{hashed_id, EdgeProps};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: &str = "2026-01-01T00:00:00+00:00";
    const LATER: &str = "2026-01-02T00:00:00+00:00";
    const BUILD: &str = "ingest-test";

    fn term(name: &str, category: Category, tags: &[&str]) -> Term {
        Term {
            name: name.to_string(),
            category,
            canonical_id: hashed_id(category.code(), category.label(), name),
            aliases: None,
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            description: None,
            source: None,
            confidence: 1.0,
        }
    }

    fn edge(source: &str, target: &str, inferred: bool, build_id: &str) -> EdgeFact {
        EdgeFact {
            source: TermKey::new(source, Category::TestCase),
            relation: RelationType::RelatedTo,
            target: TermKey::new(target, Category::Metric),
            props: EdgeProps {
                confidence: Some(0.5),
                inferred,
                ..Default::default()
            },
            build_id: build_id.to_string(),
            preserve_curated: inferred,
        }
    }

    #[tokio::test]
    async fn test_upsert_term_is_idempotent() {
        let store = MemoryStore::new();
        let t = term("跌落测试", Category::TestCase, &["可靠性", "机械"]);

        assert_eq!(store.upsert_term(&t, BUILD, NOW).await.unwrap(), WriteOutcome::Created);
        assert_eq!(store.upsert_term(&t, BUILD, LATER).await.unwrap(), WriteOutcome::Updated);

        assert_eq!(store.node_count("Term"), 1);
        assert_eq!(store.node_count("Tag"), 2);
        assert_eq!(store.node_count("Category"), 1);
        assert_eq!(store.edges_of_type("HAS_TAG").len(), 2);
        assert_eq!(store.edges_of_type("BELONGS_TO").len(), 1);

        let props = store.term_props(&t.key()).unwrap();
        assert_eq!(props["created_at"], json!(NOW));
        assert_eq!(props["updated_at"], json!(LATER));
        let labels = store.term_labels(&t.key()).unwrap();
        assert!(labels.contains("Term") && labels.contains("TestCase"));
    }

    #[tokio::test]
    async fn test_upsert_term_keeps_omitted_optional_fields() {
        let store = MemoryStore::new();
        let mut t = term("屏幕", Category::Component, &[]);
        t.description = Some("显示模组".to_string());
        store.upsert_term(&t, BUILD, NOW).await.unwrap();

        t.description = None;
        store.upsert_term(&t, BUILD, LATER).await.unwrap();

        let props = store.term_props(&t.key()).unwrap();
        assert_eq!(props["description"], json!("显示模组"));
    }

    #[tokio::test]
    async fn test_upsert_term_replaces_tag_set() {
        let store = MemoryStore::new();
        store
            .upsert_term(&term("屏幕", Category::Component, &["显示", "玻璃"]), BUILD, NOW)
            .await
            .unwrap();
        store
            .upsert_term(&term("屏幕", Category::Component, &["显示"]), BUILD, LATER)
            .await
            .unwrap();

        let links = store.edges_of_type("HAS_TAG");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_name, "显示");
        let found = store
            .find_term(&TermKey::new("屏幕", Category::Component))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tags, BTreeSet::from(["显示".to_string()]));
    }

    #[tokio::test]
    async fn test_omitted_sets_keep_stored_links() {
        let store = MemoryStore::new();
        let mut t = term("屏幕", Category::Component, &["显示", "玻璃"]);
        t.aliases = Some(BTreeSet::from(["LCD".to_string()]));
        store.upsert_term(&t, BUILD, NOW).await.unwrap();

        t.tags = None;
        t.aliases = None;
        store.upsert_term(&t, BUILD, LATER).await.unwrap();

        assert_eq!(store.edges_of_type("HAS_TAG").len(), 2);
        assert_eq!(store.edges_of_type("ALIAS_OF").len(), 1);
        let props = store.term_props(&t.key()).unwrap();
        assert_eq!(props["tags"], json!(["显示", "玻璃"]));

        t.tags = Some(BTreeSet::new());
        store.upsert_term(&t, BUILD, LATER).await.unwrap();
        assert!(store.edges_of_type("HAS_TAG").is_empty());
        assert_eq!(store.term_props(&t.key()).unwrap()["tags"], json!([]));
    }

    #[tokio::test]
    async fn test_attribute_links_carry_provenance() {
        let store = MemoryStore::new();
        let mut t = term("屏幕", Category::Component, &["显示"]);
        t.aliases = Some(BTreeSet::from(["LCD".to_string()]));
        t.source = Some("dict_v1".to_string());
        store.upsert_term(&t, "ingest-1", NOW).await.unwrap();
        store.upsert_term(&t, "ingest-2", LATER).await.unwrap();

        for rel in ["BELONGS_TO", "HAS_TAG", "ALIAS_OF"] {
            let links = store.edges_of_type(rel);
            assert_eq!(links.len(), 1, "{rel}");
            assert_eq!(links[0].props["build_id"], json!("ingest-1"), "{rel}");
            assert_eq!(links[0].props["source"], json!("dict_v1"), "{rel}");
            assert_eq!(links[0].props["confidence"], json!(1.0), "{rel}");
        }

        assert_eq!(store.delete_edges_by_build_id("ingest-1").await.unwrap(), 3);
        assert_eq!(store.node_count("Term"), 1);
    }

    #[tokio::test]
    async fn test_every_written_node_has_canonical_id() {
        let store = MemoryStore::new();
        let mut t = term("屏幕", Category::Component, &["显示"]);
        t.aliases = Some(BTreeSet::from(["LCD".to_string()]));
        store.upsert_term(&t, BUILD, NOW).await.unwrap();

        let graph = store.lock();
        let ids: BTreeMap<String, String> = graph
            .nodes
            .values()
            .map(|n| {
                let label = n.labels.iter().next().cloned().unwrap_or_default();
                let id = str_prop(&n.props, "canonical_id").unwrap_or_default().to_string();
                (label, id)
            })
            .collect();
        assert_eq!(ids["Category"], Category::Component.node_canonical_id());
        assert_eq!(ids["Tag"], tag_canonical_id("显示"));
        assert_eq!(ids["Alias"], alias_canonical_id("LCD"));
        assert_eq!(ids["Component"], t.canonical_id);
    }

    #[tokio::test]
    async fn test_case_variant_cannot_take_existing_canonical_id() {
        let store = MemoryStore::new();
        let upper = term("Camera", Category::Component, &[]);
        let lower = term("camera", Category::Component, &[]);
        assert_eq!(upper.canonical_id, lower.canonical_id);

        store.upsert_term(&upper, BUILD, NOW).await.unwrap();
        let outcome = store.upsert_term(&lower, BUILD, NOW).await.unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::IdConflict {
                holder: "Camera".to_string()
            }
        );
        assert_eq!(store.node_count("Term"), 1);
        assert_eq!(
            store.upsert_term(&upper, BUILD, LATER).await.unwrap(),
            WriteOutcome::Updated
        );
    }

    #[tokio::test]
    async fn test_edge_identity_and_provenance() {
        let store = MemoryStore::new();
        store.upsert_term(&term("跌落测试", Category::TestCase, &[]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("跌落高度", Category::Metric, &[]), BUILD, NOW).await.unwrap();

        let first = edge("跌落测试", "跌落高度", false, "import-a");
        assert_eq!(store.upsert_edge(&first, NOW).await.unwrap(), EdgeOutcome::Created);
        let second = edge("跌落测试", "跌落高度", false, "import-b");
        assert_eq!(store.upsert_edge(&second, LATER).await.unwrap(), EdgeOutcome::Updated);

        let edges = store.edges_of_type("RELATED_TO");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].props["build_id"], json!("import-a"));
        assert_eq!(edges[0].props["last_build_id"], json!("import-b"));
        assert_eq!(edges[0].props["created_at"], json!(NOW));
    }

    #[tokio::test]
    async fn test_missing_endpoint_writes_nothing() {
        let store = MemoryStore::new();
        store.upsert_term(&term("跌落测试", Category::TestCase, &[]), BUILD, NOW).await.unwrap();

        let outcome = store
            .upsert_edge(&edge("跌落测试", "不存在", false, "b"), NOW)
            .await
            .unwrap();
        assert_eq!(outcome, EdgeOutcome::MissingEndpoint);
        assert!(store.edges_of_type("RELATED_TO").is_empty());
    }

    #[tokio::test]
    async fn test_inferred_write_preserves_curated_edge() {
        let store = MemoryStore::new();
        store.upsert_term(&term("跌落测试", Category::TestCase, &[]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("跌落高度", Category::Metric, &[]), BUILD, NOW).await.unwrap();
        store
            .upsert_edge(&edge("跌落测试", "跌落高度", false, "curated"), NOW)
            .await
            .unwrap();

        let outcome = store
            .upsert_edge(&edge("跌落测试", "跌落高度", true, "tag-overlap-x"), LATER)
            .await
            .unwrap();
        assert_eq!(outcome, EdgeOutcome::Preserved);
        let edges = store.edges_of_type("RELATED_TO");
        assert_eq!(edges[0].props["inferred"], json!(false));
        assert_eq!(edges[0].props["last_build_id"], json!("curated"));
    }

    #[tokio::test]
    async fn test_delete_by_build_id_and_inventory() {
        let store = MemoryStore::new();
        store.upsert_term(&term("a", Category::TestCase, &[]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("m1", Category::Metric, &[]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("m2", Category::Metric, &[]), BUILD, NOW).await.unwrap();
        store.upsert_edge(&edge("a", "m1", true, "run-1"), NOW).await.unwrap();
        store.upsert_edge(&edge("a", "m2", true, "run-2"), NOW).await.unwrap();

        let builds = store.build_summaries().await.unwrap();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].build_id, "run-1");

        assert_eq!(store.delete_edges_by_build_id("run-1").await.unwrap(), 1);
        assert_eq!(store.delete_edges_by_build_id("run-1").await.unwrap(), 0);
        assert_eq!(store.edges_of_type("RELATED_TO").len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_and_restore() {
        let store = MemoryStore::new();
        let keep = store.insert_node(&["Component"], json!({"name": "屏幕", "created_at": NOW}));
        let dup = store.insert_node(&["Component"], json!({"name": "屏幕", "created_at": LATER}));
        let other = store.insert_node(&["Symptom"], json!({"name": "划伤"}));
        store.insert_edge(&dup, "HAS_SYMPTOM", &other, json!({"confidence": 0.7}));
        store.insert_edge(&keep, "HAS_SYMPTOM", &other, json!({"confidence": 0.9}));
        store.insert_edge(&dup, "RELATED_TO", &keep, json!({}));

        let groups = store.duplicate_groups("Component").await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].nodes.len(), 2);

        let group = vec![keep.clone(), dup.clone()];
        assert_eq!(store.redirect_edges(&dup, &keep, &group).await.unwrap(), 1);
        assert_eq!(store.delete_nodes(&[dup.clone()]).await.unwrap(), 1);
        let restored = store.restore_pending_edges(LATER).await.unwrap();

        assert_eq!(restored, RestoreOutcome { restored: 0, collapsed: 1 });
        let edges = store.edges_of_type("HAS_SYMPTOM");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].props["confidence"], json!(0.9));
        assert!(store.edges_of_type("RELATED_TO").is_empty());
        assert!(store.edges_of_type(MERGE_PENDING).is_empty());
    }

    #[tokio::test]
    async fn test_align_same_as_is_idempotent() {
        let store = MemoryStore::new();
        store.upsert_term(&term("屏幕", Category::Component, &[]), BUILD, NOW).await.unwrap();
        store.insert_node(&["Component"], json!({"term": "屏幕"}));

        let first = store.align_same_as(Category::Component, "align-1", NOW).await.unwrap();
        let second = store.align_same_as(Category::Component, "align-2", LATER).await.unwrap();

        assert_eq!(first, AlignOutcome { created: 1, existing: 0 });
        assert_eq!(second, AlignOutcome { created: 0, existing: 1 });
        let links = store.edges_of_type("SAME_AS");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].props["source"], json!("term_base"));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let store = MemoryStore::new();

        let tx = store.begin().await.unwrap();
        tx.upsert_term(&term("a", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.node_count("Term"), 0);

        let tx = store.begin().await.unwrap();
        tx.upsert_term(&term("a", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.node_count("Term"), 1);
    }

    #[tokio::test]
    async fn test_overlapping_transactions_do_not_lose_writes() {
        let store = MemoryStore::new();

        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        first.upsert_term(&term("a", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        second.upsert_term(&term("b", Category::Tool, &[]), BUILD, NOW).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_retryable());

        let tx = store.begin().await.unwrap();
        tx.upsert_term(&term("b", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.node_count("Term"), 2);
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_writes() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);

        let tx = store.begin().await.unwrap();
        tx.upsert_term(&term("a", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.node_count("Term"), 0);

        let tx = store.begin().await.unwrap();
        tx.upsert_term(&term("a", Category::Tool, &[]), BUILD, NOW).await.unwrap();
        assert!(tx.commit().await.is_ok());
    }

    #[tokio::test]
    async fn test_audit_counts() {
        let store = MemoryStore::new();
        store.upsert_term(&term("a", Category::TestCase, &["x"]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("m", Category::Metric, &["x"]), BUILD, NOW).await.unwrap();
        store.upsert_term(&term("lonely", Category::Tool, &["x"]), BUILD, NOW).await.unwrap();
        store.upsert_edge(&edge("a", "m", true, "run"), NOW).await.unwrap();

        let audit = store.audit_edges().await.unwrap();
        assert_eq!(audit.total_edges, 1);
        assert_eq!(audit.confidence_buckets.get("0.5-0.8"), Some(&1));
        assert_eq!(audit.inferred_by_type.get("RELATED_TO"), Some(&1));
        assert_eq!(audit.orphan_terms, 1);
        assert_eq!(audit.duplicate_edges, 0);
    }
}
