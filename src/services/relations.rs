//! Batch import of curated relations.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::Context;
use crate::di::FromContext;
use crate::models::{new_build_id, EdgeFact, EdgeProps, RelationInput, RelationType, Report, TermKey};
use crate::repositories::AppStore;
use crate::services::validation::{
    source_hash, status_for, RelationRejection, RelationValidator, ValidatedRelation,
};
use crate::services::writer::UpsertWriter;

const DEFAULT_SOURCE: &str = "relation_import";

/// Validates proposed relations and writes the legal subset.
#[derive(FromContext, Clone)]
pub struct RelationImporter {
    store: AppStore,
    validator: RelationValidator,
    writer: UpsertWriter,
}

impl RelationImporter {
    pub fn new(store: AppStore, validator: RelationValidator, writer: UpsertWriter) -> Self {
        Self {
            store,
            validator,
            writer,
        }
    }

    /// Validates each relation independently and writes those that pass.
    ///
    /// Every accepted edge carries this run's `import-*` build id. With
    /// `dry_run` nothing is written and accepted relations are counted as
    /// skipped.
    pub async fn import_relations(
        &self,
        inputs: &[RelationInput],
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Report {
        let build_id = new_build_id("import");
        let mut report = Report::new("import-relations").with_build_id(&build_id);
        let mut accepted: Vec<EdgeFact> = Vec::new();
        let mut batch: BTreeSet<(TermKey, TermKey, RelationType)> = BTreeSet::new();

        for input in inputs {
            let checked = match self.validator.validate(input) {
                Ok(valid) => self.check_against_graph(valid, &batch).await,
                Err(rejection) => Err(rejection.to_string()),
            };
            match checked {
                Ok(valid) => {
                    batch.insert((valid.source.clone(), valid.target.clone(), valid.relation));
                    accepted.push(edge_fact(valid, &build_id));
                }
                Err(reason) => {
                    warn!(relation = %input.relation_type, %reason, "Relation rejected");
                    report.reject(input, reason);
                }
            }
        }

        info!(
            accepted = accepted.len(),
            rejected = report.rejected.len(),
            dry_run,
            "Relations validated"
        );
        if dry_run {
            report.skipped = accepted.len();
            return report;
        }

        report.absorb(
            self.writer
                .write_edges("import-relations", &accepted, cancel)
                .await,
        );
        report
    }

    /// Endpoint existence and conflict checks; failures become reasons.
    async fn check_against_graph(
        &self,
        valid: ValidatedRelation,
        batch: &BTreeSet<(TermKey, TermKey, RelationType)>,
    ) -> Result<ValidatedRelation, String> {
        for endpoint in [&valid.source, &valid.target] {
            match self.store.find_term(endpoint).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(RelationRejection::EndpointNotFound(endpoint.clone()).to_string())
                }
                Err(err) => return Err(format!("endpoint lookup failed: {}", err)),
            }
        }

        let conflicting = self.validator.schema().conflicts_with(valid.relation);
        if conflicting.is_empty() {
            return Ok(valid);
        }

        let existing = self
            .store
            .relations_between(&valid.source, &valid.target)
            .await
            .map_err(|err| format!("conflict lookup failed: {}", err))?;
        let in_graph = existing.into_iter().find(|name| {
            conflicting
                .iter()
                .any(|c| c.as_relationship() == name.as_str())
        });
        let in_batch = conflicting
            .iter()
            .find(|c| {
                batch.contains(&(valid.source.clone(), valid.target.clone(), **c))
                    || batch.contains(&(valid.target.clone(), valid.source.clone(), **c))
            })
            .map(|c| c.to_string());

        match in_graph.or(in_batch) {
            Some(existing) => Err(RelationRejection::ConflictingRelation {
                relation: valid.relation,
                existing,
            }
            .to_string()),
            None => Ok(valid),
        }
    }
}

fn edge_fact(valid: ValidatedRelation, build_id: &str) -> EdgeFact {
    let props = valid.props;
    let provenance = props
        .source
        .clone()
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    let evidence = props.evidence.as_deref().map(str::trim).map(str::to_string);
    let hash = source_hash(
        &valid.source,
        &valid.target,
        evidence.as_deref().unwrap_or_default(),
        &provenance,
    );
    let common_tags: Option<Vec<String>> = props.common_tags.map(|t| t.into_iter().collect());

    EdgeFact {
        source: valid.source,
        relation: valid.relation,
        target: valid.target,
        props: EdgeProps {
            confidence: Some(valid.confidence),
            inferred: props.inferred,
            evidence,
            source: Some(provenance),
            rule: props.rule,
            common_count: common_tags.as_ref().map(|t| t.len() as i64),
            common_tags,
            status: Some(status_for(valid.confidence).to_string()),
            source_hash: Some(hash),
            extra: props.extra,
        },
        build_id: build_id.to_string(),
        preserve_curated: props.inferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::WriterConfig;
    use crate::models::{Category, NodeRef, RelationInputProps, RelationRule, SchemaConfig, Term};
    use crate::repositories::{MemoryStore, TermStore};
    use crate::services::canonical::{canonical_id, Canonicalizer};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const EVIDENCE: &str = "治具颗粒导致压合受力不均";

    fn importer(store: &MemoryStore) -> RelationImporter {
        importer_with(store, SchemaConfig::default())
    }

    fn importer_with(store: &MemoryStore, schema: SchemaConfig) -> RelationImporter {
        let schema = Arc::new(schema);
        let store: AppStore = Arc::new(store.clone());
        RelationImporter::new(
            store.clone(),
            RelationValidator::new(schema.clone()),
            UpsertWriter::new(
                store,
                Arc::new(WriterConfig::default()),
                Canonicalizer::new(schema),
            ),
        )
    }

    async fn seed(store: &MemoryStore, name: &str, category: Category) {
        let term = Term {
            name: name.to_string(),
            category,
            canonical_id: canonical_id(category, name),
            aliases: None,
            tags: None,
            description: None,
            source: None,
            confidence: 1.0,
        };
        store.upsert_term(&term, "ingest-test", "2026-01-01T00:00:00+00:00").await.unwrap();
    }

    fn relation(kind: &str, source: (&str, &str), target: (&str, &str)) -> RelationInput {
        RelationInput {
            relation_type: kind.to_string(),
            source: NodeRef {
                name: source.0.to_string(),
                category: source.1.to_string(),
            },
            target: NodeRef {
                name: target.0.to_string(),
                category: target.1.to_string(),
            },
            props: RelationInputProps {
                confidence: Some(0.85),
                evidence: Some(EVIDENCE.to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_import_writes_valid_subset() {
        let store = MemoryStore::new();
        seed(&store, "治具颗粒杂质", Category::RootCause).await;
        seed(&store, "电池盖裂纹", Category::Symptom).await;

        let report = importer(&store)
            .import_relations(
                &[
                    relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom")),
                    relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("不存在", "Symptom")),
                ],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.created, 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].reason.starts_with("endpoint not found"));

        let edges = store.edges_of_type("CAUSES");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].props["confidence"], json!(0.85));
        assert_eq!(edges[0].props["status"], json!("verified"));
        assert_eq!(edges[0].props["inferred"], json!(false));
        assert_eq!(edges[0].props["build_id"], json!(report.build_id.clone().unwrap()));
    }

    #[tokio::test]
    async fn test_reimport_updates_instead_of_duplicating() {
        let store = MemoryStore::new();
        seed(&store, "治具颗粒杂质", Category::RootCause).await;
        seed(&store, "电池盖裂纹", Category::Symptom).await;
        let input = [relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom"))];

        importer(&store)
            .import_relations(&input, false, &CancellationToken::new())
            .await;
        let second = importer(&store)
            .import_relations(&input, false, &CancellationToken::new())
            .await;

        assert_eq!(second.updated, 1);
        assert_eq!(store.edges_of_type("CAUSES").len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_relation_is_rejected() {
        let store = MemoryStore::new();
        seed(&store, "治具颗粒杂质", Category::RootCause).await;
        seed(&store, "电池盖裂纹", Category::Symptom).await;
        let mut schema = SchemaConfig::default();
        schema
            .relation_rules
            .insert(RelationType::Prevents, RelationRule::default());
        let importer = importer_with(&store, schema);

        importer
            .import_relations(
                &[relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom"))],
                false,
                &CancellationToken::new(),
            )
            .await;
        let report = importer
            .import_relations(
                &[relation("PREVENTS", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom"))],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.created, 0);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].reason.contains("conflicts with existing CAUSES"));
        assert!(store.edges_of_type("PREVENTS").is_empty());
    }

    #[tokio::test]
    async fn test_conflict_within_one_batch() {
        let store = MemoryStore::new();
        seed(&store, "治具颗粒杂质", Category::RootCause).await;
        seed(&store, "电池盖裂纹", Category::Symptom).await;
        let mut schema = SchemaConfig::default();
        schema
            .relation_rules
            .insert(RelationType::Prevents, RelationRule::default());

        let report = importer_with(&store, schema)
            .import_relations(
                &[
                    relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom")),
                    relation("PREVENTS", ("电池盖裂纹", "Symptom"), ("治具颗粒杂质", "RootCause")),
                ],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.created, 1);
        assert_eq!(report.rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = MemoryStore::new();
        seed(&store, "治具颗粒杂质", Category::RootCause).await;
        seed(&store, "电池盖裂纹", Category::Symptom).await;

        let report = importer(&store)
            .import_relations(
                &[relation("CAUSES", ("治具颗粒杂质", "RootCause"), ("电池盖裂纹", "Symptom"))],
                true,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.skipped, 1);
        assert!(store.edges_of_type("CAUSES").is_empty());
    }
}
