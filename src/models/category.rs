//! Category enum for canonical business terms.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed categories a canonical Term can belong to.
///
/// Each category doubles as a node label in the graph and contributes a
/// short code prefix to the term's canonical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Component,
    Symptom,
    Tool,
    Process,
    TestCase,
    Material,
    Role,
    Metric,
    RootCause,
    Solution,
}

impl Category {
    /// Returns a static slice of all categories.
    pub fn all() -> &'static [Category] {
        &[
            Category::Component,
            Category::Symptom,
            Category::Tool,
            Category::Process,
            Category::TestCase,
            Category::Material,
            Category::Role,
            Category::Metric,
            Category::RootCause,
            Category::Solution,
        ]
    }

    /// Three-letter code used as the canonical id prefix.
    pub fn code(&self) -> &'static str {
        match self {
            Category::Component => "CMP",
            Category::Symptom => "SYM",
            Category::Tool => "TOL",
            Category::Process => "PRC",
            Category::TestCase => "TST",
            Category::Material => "MAT",
            Category::Role => "ROL",
            Category::Metric => "MET",
            Category::RootCause => "RCA",
            Category::Solution => "SOL",
        }
    }

    /// Node label for this category.
    ///
    /// Always one of a fixed set of identifiers, so it is safe to splice
    /// into a Cypher pattern where parameters are not allowed.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Component => "Component",
            Category::Symptom => "Symptom",
            Category::Tool => "Tool",
            Category::Process => "Process",
            Category::TestCase => "TestCase",
            Category::Material => "Material",
            Category::Role => "Role",
            Category::Metric => "Metric",
            Category::RootCause => "RootCause",
            Category::Solution => "Solution",
        }
    }

    /// Canonical id of the `:Category` node for this category.
    pub fn node_canonical_id(&self) -> String {
        super::term::hashed_id("CAT", "Category", self.label())
    }

    /// Returns a human-readable description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            Category::Component => "Physical part or assembly of the product",
            Category::Symptom => "Observable defect or abnormal phenomenon",
            Category::Tool => "Fixture, jig or instrument used in production or test",
            Category::Process => "Manufacturing or inspection step",
            Category::TestCase => "Reliability or functional test procedure",
            Category::Material => "Raw or auxiliary material",
            Category::Role => "Responsible role or team",
            Category::Metric => "Measured quantity or KPI",
            Category::RootCause => "Underlying cause of a symptom",
            Category::Solution => "Corrective or preventive action",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Parses a category label case-insensitively.
    ///
    /// Free-text aliases (e.g. `症状`) are resolved by
    /// [`SchemaConfig::resolve_category`](crate::models::SchemaConfig::resolve_category),
    /// not here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::all()
            .iter()
            .find(|c| c.label().eq_ignore_ascii_case(wanted) || c.code().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| {
                format!(
                    "Invalid category '{}'. Valid values: {}",
                    s,
                    Category::all()
                        .iter()
                        .map(|c| c.label())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}
