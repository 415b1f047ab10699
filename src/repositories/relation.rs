//! Cypher implementation of [`RelationStore`].

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::{CypherExecutor, QueryExt};
use crate::models::{EdgeFact, RelationType, TermKey};
use crate::repositories::{
    confidence_bucket, edge_property_map, preserves_existing, BuildSummary, CypherRepository,
    EdgeAudit, EdgeOutcome, RelationStore, MERGE_PENDING,
};

#[async_trait]
impl<E: CypherExecutor> RelationStore for CypherRepository<E> {
    async fn upsert_edge(&self, edge: &EdgeFact, now: &str) -> Result<EdgeOutcome, AppError> {
        let rel = edge.relation.as_relationship();

        let lookup = format!(
            "MATCH (s:Term {{name: $source_name, category: $source_category}})
             MATCH (t:Term {{name: $target_name, category: $target_category}})
             OPTIONAL MATCH (s)-[r:{rel}]->(t)
             RETURN r IS NOT NULL AS existed, r.inferred AS inferred
             LIMIT 1"
        );
        let Some(row) = self
            .executor
            .query(&lookup)
            .param("source_name", &edge.source.name)
            .param("source_category", edge.source.category.label())
            .param("target_name", &edge.target.name)
            .param("target_category", edge.target.category.label())
            .fetch_one()
            .await?
        else {
            return Ok(EdgeOutcome::MissingEndpoint);
        };

        let existed: bool = row.get("existed")?;
        if preserves_existing(edge, row.get_opt("inferred")?) {
            return Ok(EdgeOutcome::Preserved);
        }

        // build_id and created_at belong to the run that created the edge
        let write = format!(
            "MATCH (s:Term {{name: $source_name, category: $source_category}})
             MATCH (t:Term {{name: $target_name, category: $target_category}})
             MERGE (s)-[r:{rel}]->(t)
             ON CREATE SET r.created_at = $now, r.build_id = $build_id
             SET r += $props,
                 r.updated_at = $now,
                 r.last_build_id = $build_id"
        );
        self.executor
            .query(&write)
            .param("source_name", &edge.source.name)
            .param("source_category", edge.source.category.label())
            .param("target_name", &edge.target.name)
            .param("target_category", edge.target.category.label())
            .param("props", edge_property_map(edge))
            .param("build_id", &edge.build_id)
            .param("now", now)
            .run()
            .await?;

        Ok(if existed {
            EdgeOutcome::Updated
        } else {
            EdgeOutcome::Created
        })
    }

    async fn relations_between(&self, a: &TermKey, b: &TermKey) -> Result<Vec<String>, AppError> {
        let rows = self
            .executor
            .query(
                "MATCH (a:Term {name: $a_name, category: $a_category})
                       -[r]-(b:Term {name: $b_name, category: $b_category})
                 RETURN DISTINCT type(r) AS relation",
            )
            .param("a_name", &a.name)
            .param("a_category", a.category.label())
            .param("b_name", &b.name)
            .param("b_category", b.category.label())
            .fetch_all()
            .await?;

        rows.iter().map(|row| row.get("relation")).collect()
    }

    async fn delete_edges_by_build_id(&self, build_id: &str) -> Result<usize, AppError> {
        let deleted = crate::cypher!(
            self.executor,
            "MATCH ()-[r]->()
             WHERE r.build_id = $build_id
             DELETE r
             RETURN count(*) AS deleted",
            build_id = build_id,
        )
        .fetch_count("deleted")
        .await?;

        Ok(deleted as usize)
    }

    async fn build_summaries(&self) -> Result<Vec<BuildSummary>, AppError> {
        let rows = self
            .executor
            .query(
                "MATCH ()-[r]->()
                 WHERE r.build_id IS NOT NULL
                 RETURN r.build_id AS build_id, type(r) AS relation, count(*) AS count
                 ORDER BY build_id, relation",
            )
            .fetch_all()
            .await?;

        rows.iter()
            .map(|row| {
                Ok(BuildSummary {
                    build_id: row.get("build_id")?,
                    relation: row.get("relation")?,
                    count: row.get::<i64>("count")? as usize,
                })
            })
            .collect()
    }

    async fn audit_edges(&self) -> Result<EdgeAudit, AppError> {
        let structural: Vec<&str> = RelationType::all()
            .iter()
            .filter(|r| r.is_structural())
            .map(|r| r.as_relationship())
            .chain(std::iter::once(MERGE_PENDING))
            .collect();

        let mut audit = EdgeAudit::default();

        let rows = self
            .executor
            .query(
                "MATCH (:Term)-[r]->(:Term)
                 WHERE NOT type(r) IN $structural
                 RETURN r.confidence AS confidence, r.inferred AS inferred, type(r) AS relation",
            )
            .param("structural", &structural)
            .fetch_all()
            .await?;
        for row in &rows {
            audit.total_edges += 1;
            let bucket = confidence_bucket(row.get_opt("confidence")?);
            *audit
                .confidence_buckets
                .entry(bucket.to_string())
                .or_default() += 1;
            if row.get_opt::<bool>("inferred")? == Some(true) {
                *audit
                    .inferred_by_type
                    .entry(row.get("relation")?)
                    .or_default() += 1;
            }
        }

        audit.duplicate_edges = self
            .executor
            .query(
                "MATCH (a)-[r]->(b)
                 WITH a, b, type(r) AS relation, count(r) AS parallel
                 WHERE parallel > 1
                 RETURN sum(parallel - 1) AS duplicates",
            )
            .fetch_count("duplicates")
            .await? as usize;

        audit.orphan_terms = self
            .executor
            .query(
                "MATCH (t:Term)
                 WHERE NOT EXISTS { (t)-[]-(:Term) }
                 RETURN count(t) AS orphans",
            )
            .fetch_count("orphans")
            .await? as usize;

        audit.pending_merges = self
            .executor
            .query("MATCH ()-[p:MERGE_PENDING]->() RETURN count(p) AS pending")
            .fetch_count("pending")
            .await? as usize;

        Ok(audit)
    }
}
