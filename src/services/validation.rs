//! Schema and evidence rules for proposed relations.
//!
//! These checks are pure: they look only at the proposal and the
//! configured vocabulary. Endpoint existence and conflicts need the store
//! and are checked by the importer.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::Context;
use crate::di::FromContext;
use crate::models::{
    CategoryPair, RelationInput, RelationInputProps, RelationType, SchemaConfig, TermKey,
};

/// Why a proposed relation was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelationRejection {
    #[error("unknown relation type '{0}'")]
    UnknownRelationType(String),

    #[error("{0} is maintained from term attributes and cannot be imported")]
    ReservedRelationType(RelationType),

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("{relation} does not allow {actual}; expected {}", format_pairs(.expected))]
    CategoryMismatch {
        relation: RelationType,
        actual: CategoryPair,
        expected: Vec<CategoryPair>,
    },

    #[error("curated relation requires evidence")]
    MissingEvidence,

    #[error("evidence has {len} characters, at least {min} required")]
    EvidenceTooShort { len: usize, min: usize },

    #[error("confidence is required")]
    MissingConfidence,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("inferred relation must carry '{0}'")]
    MissingInferenceProvenance(&'static str),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(TermKey),

    #[error("{relation} conflicts with existing {existing} between the same terms")]
    ConflictingRelation {
        relation: RelationType,
        existing: String,
    },
}

fn format_pairs(pairs: &[CategoryPair]) -> String {
    pairs
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// A proposal that passed every store-independent rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRelation {
    pub relation: RelationType,
    pub source: TermKey,
    pub target: TermKey,
    pub confidence: f64,
    pub props: RelationInputProps,
}

/// Review status stamped on curated relations.
pub fn status_for(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "verified"
    } else if confidence >= 0.6 {
        "plausible"
    } else {
        "uncertain"
    }
}

/// Fingerprint of a relation's provenance: 16 hex chars of sha-256.
pub fn source_hash(source: &TermKey, target: &TermKey, evidence: &str, provenance: &str) -> String {
    let material = format!("{}|{}|{}|{}", source.name, target.name, evidence, provenance);
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Applies the category table and the confidence/evidence contract.
#[derive(FromContext, Clone)]
pub struct RelationValidator {
    schema: Arc<SchemaConfig>,
}

impl RelationValidator {
    pub fn new(schema: Arc<SchemaConfig>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    pub fn validate(&self, input: &RelationInput) -> Result<ValidatedRelation, RelationRejection> {
        let relation: RelationType = input
            .relation_type
            .parse()
            .map_err(|_| RelationRejection::UnknownRelationType(input.relation_type.clone()))?;
        if relation.is_structural() {
            return Err(RelationRejection::ReservedRelationType(relation));
        }
        let rule = self
            .schema
            .rule(relation)
            .ok_or_else(|| RelationRejection::UnknownRelationType(input.relation_type.clone()))?;

        let source = self.resolve_endpoint(&input.source.name, &input.source.category)?;
        let target = self.resolve_endpoint(&input.target.name, &input.target.category)?;
        if !rule.allows(source.category, target.category) {
            return Err(RelationRejection::CategoryMismatch {
                relation,
                actual: CategoryPair::new(source.category, target.category),
                expected: rule.pairs.clone(),
            });
        }

        let props = &input.props;
        let confidence = props.confidence.ok_or(RelationRejection::MissingConfidence)?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RelationRejection::ConfidenceOutOfRange(confidence));
        }

        if props.inferred {
            if props.rule.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return Err(RelationRejection::MissingInferenceProvenance("rule"));
            }
            if props.common_tags.as_ref().map_or(true, |t| t.is_empty()) {
                return Err(RelationRejection::MissingInferenceProvenance("common_tags"));
            }
        } else {
            let evidence = props.evidence.as_deref().map(str::trim).unwrap_or_default();
            if evidence.is_empty() {
                return Err(RelationRejection::MissingEvidence);
            }
            let len = evidence.chars().count();
            if len < self.schema.evidence_min_len {
                return Err(RelationRejection::EvidenceTooShort {
                    len,
                    min: self.schema.evidence_min_len,
                });
            }
        }

        Ok(ValidatedRelation {
            relation,
            source,
            target,
            confidence,
            props: props.clone(),
        })
    }

    fn resolve_endpoint(&self, name: &str, category: &str) -> Result<TermKey, RelationRejection> {
        let category = self
            .schema
            .resolve_category(category)
            .ok_or_else(|| RelationRejection::UnknownCategory(category.to_string()))?;
        Ok(TermKey::new(name.trim(), category))
    }
}
