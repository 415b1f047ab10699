//! Tag-overlap relation inference.
//!
//! For a shape `Source -> Target`, every pair of terms is scored by the
//! tags they share: `score = |common|`, `confidence = |common| / max(1,
//! |source.tags|)`. Pairs under the shape's thresholds are dropped and each
//! source keeps its top-K targets. Survivors are written as inferred edges
//! stamped with one build id per run, so a run can be rolled back whole.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::Context;
use crate::di::FromContext;
use crate::error::AppError;
use crate::models::{
    new_build_id, EdgeFact, EdgeProps, InferenceShape, Report, SchemaConfig, TaggedTerm, TermKey,
};
use crate::repositories::AppStore;
use crate::services::writer::UpsertWriter;

pub const INFERENCE_RULE: &str = "tag_overlap";
pub const INFERENCE_SOURCE: &str = "tag_similarity";
const BUILD_PREFIX: &str = "tag-overlap";

/// Thresholds and cap for one inference pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    pub min_score: usize,
    pub min_confidence: f64,
    pub top_k: usize,
}

impl From<&InferenceShape> for InferenceParams {
    fn from(shape: &InferenceShape) -> Self {
        Self {
            min_score: shape.min_score,
            min_confidence: shape.min_confidence,
            top_k: shape.top_k,
        }
    }
}

/// Caller overrides applied on top of a shape's configured thresholds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOverrides {
    pub min_score: Option<usize>,
    pub min_confidence: Option<f64>,
    pub top_k: Option<usize>,
}

impl InferenceOverrides {
    fn apply(&self, params: InferenceParams) -> InferenceParams {
        InferenceParams {
            min_score: self.min_score.unwrap_or(params.min_score),
            min_confidence: self.min_confidence.unwrap_or(params.min_confidence),
            top_k: self.top_k.unwrap_or(params.top_k),
        }
    }
}

/// A scored source/target pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub source: TermKey,
    pub target: TermKey,
    pub common: BTreeSet<String>,
    pub score: usize,
    pub confidence: f64,
}

/// Scores one pair by tag overlap.
pub fn score_pair(source: &TaggedTerm, target: &TaggedTerm) -> Candidate {
    let common: BTreeSet<String> = source.tags.intersection(&target.tags).cloned().collect();
    let score = common.len();
    Candidate {
        source: source.key(),
        target: target.key(),
        confidence: score as f64 / source.tags.len().max(1) as f64,
        common,
        score,
    }
}

/// Thresholds every pair and keeps each source's best `top_k` targets,
/// ordered by score, then confidence (both descending), then target name.
pub fn select_candidates(
    sources: &[TaggedTerm],
    targets: &[TaggedTerm],
    params: InferenceParams,
) -> Vec<Candidate> {
    let mut selected = Vec::new();
    for source in sources {
        let mut ranked: Vec<Candidate> = targets
            .iter()
            .filter(|target| target.key() != source.key())
            .map(|target| score_pair(source, target))
            .filter(|c| c.score >= params.min_score && c.confidence >= params.min_confidence)
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(Ordering::Equal),
                )
                .then_with(|| a.target.name.cmp(&b.target.name))
        });
        ranked.truncate(params.top_k);
        selected.extend(ranked);
    }
    selected
}

/// Runs the configured inference shapes against the store.
#[derive(FromContext, Clone)]
pub struct InferenceEngine {
    store: AppStore,
    schema: Arc<SchemaConfig>,
    writer: UpsertWriter,
}

impl InferenceEngine {
    pub fn new(store: AppStore, schema: Arc<SchemaConfig>, writer: UpsertWriter) -> Self {
        Self {
            store,
            schema,
            writer,
        }
    }

    /// Infers edges for one named shape, or for every configured shape.
    ///
    /// Unknown shapes and shapes whose category pair is illegal for their
    /// relation type are refused before anything is written.
    pub async fn infer_relations(
        &self,
        shape: Option<&str>,
        overrides: &InferenceOverrides,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Report, AppError> {
        let shapes = self.select_shapes(shape)?;
        let build_id = new_build_id(BUILD_PREFIX);
        let mut report = Report::new("infer").with_build_id(&build_id);

        let mut facts = Vec::new();
        for shape in shapes {
            let params = overrides.apply(InferenceParams::from(shape));
            let sources = self.store.terms_in_category(shape.source).await?;
            let targets = self.store.terms_in_category(shape.target).await?;
            let candidates = select_candidates(&sources, &targets, params);
            info!(
                shape = %shape.name,
                sources = sources.len(),
                targets = targets.len(),
                candidates = candidates.len(),
                "Scored tag overlap"
            );
            facts.extend(
                candidates
                    .into_iter()
                    .map(|c| inferred_edge(c, shape, &build_id)),
            );
        }

        if dry_run {
            for fact in &facts {
                debug!(source = %fact.source, target = %fact.target, "Would infer edge");
            }
            report.skipped = facts.len();
            return Ok(report);
        }

        report.absorb(self.writer.write_edges("infer", &facts, cancel).await);
        Ok(report)
    }

    fn select_shapes(&self, name: Option<&str>) -> Result<Vec<&InferenceShape>, AppError> {
        let shapes: Vec<&InferenceShape> = match name {
            Some(name) => vec![self.schema.shape(name).ok_or_else(|| {
                AppError::Validation(format!("unknown inference shape '{}'", name))
            })?],
            None => self.schema.inference.iter().collect(),
        };

        for shape in &shapes {
            let legal = self
                .schema
                .rule(shape.relation)
                .map(|rule| rule.allows(shape.source, shape.target))
                .unwrap_or(false);
            if !legal || shape.relation.is_structural() {
                return Err(AppError::Validation(format!(
                    "shape '{}' would write {} from {} to {}, which the relation rules do not allow",
                    shape.name, shape.relation, shape.source, shape.target
                )));
            }
        }
        Ok(shapes)
    }
}

fn inferred_edge(candidate: Candidate, shape: &InferenceShape, build_id: &str) -> EdgeFact {
    EdgeFact {
        source: candidate.source,
        relation: shape.relation,
        target: candidate.target,
        props: EdgeProps {
            confidence: Some(candidate.confidence),
            inferred: true,
            source: Some(INFERENCE_SOURCE.to_string()),
            rule: Some(INFERENCE_RULE.to_string()),
            common_count: Some(candidate.score as i64),
            common_tags: Some(candidate.common.into_iter().collect()),
            ..Default::default()
        },
        build_id: build_id.to_string(),
        preserve_curated: true,
    }
}
