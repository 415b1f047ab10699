//! Injectable vocabulary: categories, relation legality and inference shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Category, RelationType};

/// An allowed `(source, target)` category pair for a relation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryPair {
    pub source: Category,
    pub target: Category,
}

impl CategoryPair {
    pub const fn new(source: Category, target: Category) -> Self {
        Self { source, target }
    }
}

impl std::fmt::Display for CategoryPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Legal endpoint categories for one relation type.
///
/// An empty pair list accepts any endpoint categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRule {
    #[serde(default)]
    pub pairs: Vec<CategoryPair>,
}

impl RelationRule {
    fn pairs(pairs: &[(Category, Category)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(s, t)| CategoryPair::new(*s, *t))
                .collect(),
        }
    }

    fn any() -> Self {
        Self::default()
    }

    pub fn allows(&self, source: Category, target: Category) -> bool {
        self.pairs.is_empty() || self.pairs.contains(&CategoryPair::new(source, target))
    }
}

/// A relation shape the tag-overlap inference runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceShape {
    pub name: String,
    pub source: Category,
    pub target: Category,
    #[serde(default = "default_inferred_relation")]
    pub relation: RelationType,
    pub min_score: usize,
    pub min_confidence: f64,
    pub top_k: usize,
}

fn default_inferred_relation() -> RelationType {
    RelationType::RelatedTo
}

impl InferenceShape {
    fn general(name: &str, source: Category, target: Category) -> Self {
        Self {
            name: name.to_string(),
            source,
            target,
            relation: RelationType::RelatedTo,
            min_score: 2,
            min_confidence: 0.4,
            top_k: 5,
        }
    }
}

/// Vocabulary and rules shared by the canonicalizer, validator and
/// inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Categories accepted on ingestion.
    pub categories: Vec<Category>,
    /// Free-text category names mapped to categories (matched case-insensitively).
    pub category_aliases: BTreeMap<String, Category>,
    pub relation_rules: BTreeMap<RelationType, RelationRule>,
    /// Relation types that may not link the same endpoints in either direction.
    pub conflicts: Vec<(RelationType, RelationType)>,
    /// Minimum evidence length, in characters, for curated relations.
    pub evidence_min_len: usize,
    pub inference: Vec<InferenceShape>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        use Category::*;

        let category_aliases = [
            ("组件", Component),
            ("部件", Component),
            ("零件", Component),
            ("症状", Symptom),
            ("现象", Symptom),
            ("不良", Symptom),
            ("缺陷", Symptom),
            ("工具", Tool),
            ("治具", Tool),
            ("设备", Tool),
            ("工艺", Process),
            ("流程", Process),
            ("工序", Process),
            ("测试", TestCase),
            ("测试用例", TestCase),
            ("test_case", TestCase),
            ("材料", Material),
            ("物料", Material),
            ("角色", Role),
            ("指标", Metric),
            ("根因", RootCause),
            ("原因", RootCause),
            ("root_cause", RootCause),
            ("方案", Solution),
            ("解决方案", Solution),
            ("对策", Solution),
        ]
        .into_iter()
        .map(|(alias, category)| (alias.to_string(), category))
        .collect();

        let relation_rules = [
            (
                RelationType::Causes,
                RelationRule::pairs(&[
                    (Symptom, Symptom),
                    (RootCause, Symptom),
                    (Component, Symptom),
                    (Process, Symptom),
                    (Material, Symptom),
                ]),
            ),
            (
                RelationType::ResolvedBy,
                RelationRule::pairs(&[(Symptom, Solution)]),
            ),
            (
                RelationType::Prevents,
                RelationRule::pairs(&[(Solution, Symptom)]),
            ),
            (
                RelationType::DependsOn,
                RelationRule::pairs(&[
                    (Component, Component),
                    (Component, Material),
                    (Component, Tool),
                ]),
            ),
            (
                RelationType::InteractsWith,
                RelationRule::pairs(&[(Component, Component)]),
            ),
            (
                RelationType::Detects,
                RelationRule::pairs(&[(TestCase, Symptom)]),
            ),
            (
                RelationType::Tests,
                RelationRule::pairs(&[(TestCase, Component), (TestCase, Process)]),
            ),
            (
                RelationType::Measures,
                RelationRule::pairs(&[(TestCase, Metric)]),
            ),
            (
                RelationType::Affects,
                RelationRule::pairs(&[
                    (Component, Symptom),
                    (Process, Symptom),
                    (Material, Symptom),
                ]),
            ),
            (
                RelationType::UsesTool,
                RelationRule::pairs(&[(Process, Tool), (TestCase, Tool)]),
            ),
            (
                RelationType::Consumes,
                RelationRule::pairs(&[(Process, Material)]),
            ),
            (
                RelationType::Produces,
                RelationRule::pairs(&[(Process, Component)]),
            ),
            (
                RelationType::HasSymptom,
                RelationRule::pairs(&[(Component, Symptom)]),
            ),
            (RelationType::RelatedTo, RelationRule::any()),
            (RelationType::SameAs, RelationRule::any()),
        ]
        .into_iter()
        .collect();

        Self {
            categories: Category::all().to_vec(),
            category_aliases,
            relation_rules,
            conflicts: vec![(RelationType::Causes, RelationType::Prevents)],
            evidence_min_len: 10,
            inference: vec![
                InferenceShape::general("testcase-metric", TestCase, Metric),
                InferenceShape::general("testcase-symptom", TestCase, Symptom),
                InferenceShape::general("testcase-component", TestCase, Component),
                InferenceShape::general("component-symptom", Component, Symptom),
                // Tool co-tagging is noisy
                InferenceShape {
                    min_score: 3,
                    min_confidence: 0.5,
                    top_k: 3,
                    ..InferenceShape::general("testcase-tool", TestCase, Tool)
                },
            ],
        }
    }
}

impl SchemaConfig {
    /// Resolves a free-text category to an accepted [`Category`].
    ///
    /// Tries the canonical labels first, then the alias table. Categories
    /// not listed in `categories` are refused even if they parse.
    pub fn resolve_category(&self, raw: &str) -> Option<Category> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let category = trimmed.parse::<Category>().ok().or_else(|| {
            self.category_aliases
                .iter()
                .find(|(alias, _)| alias.trim().to_lowercase() == trimmed.to_lowercase())
                .map(|(_, category)| *category)
        })?;
        self.categories.contains(&category).then_some(category)
    }

    /// The rule for a relation type, if the type may be imported at all.
    pub fn rule(&self, relation: RelationType) -> Option<&RelationRule> {
        self.relation_rules.get(&relation)
    }

    /// Relation types that conflict with `relation`.
    pub fn conflicts_with(&self, relation: RelationType) -> Vec<RelationType> {
        self.conflicts
            .iter()
            .filter_map(|(a, b)| {
                if *a == relation {
                    Some(*b)
                } else if *b == relation {
                    Some(*a)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn shape(&self, name: &str) -> Option<&InferenceShape> {
        self.inference.iter().find(|s| s.name == name)
    }
}
