//! Cypher implementation of [`MaintenanceStore`].
//!
//! Node identity uses `elementId()`, the only handle that tells two
//! duplicates apart.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::{CypherExecutor, QueryExt};
use crate::models::Category;
use crate::repositories::{
    checked_identifier, AlignOutcome, CypherRepository, DuplicateGroup, MaintenanceStore,
    NodeHandle, RestoreOutcome,
};

#[async_trait]
impl<E: CypherExecutor> MaintenanceStore for CypherRepository<E> {
    async fn duplicate_groups(&self, label: &str) -> Result<Vec<DuplicateGroup>, AppError> {
        let label = checked_identifier(label)?;
        let cypher = format!(
            "MATCH (n:{label})
             WHERE n.name IS NOT NULL
             WITH n.name AS name, n.category AS category, collect(n) AS nodes
             WHERE size(nodes) > 1
             UNWIND nodes AS n
             RETURN name, category, elementId(n) AS id,
                    toString(n.created_at) AS created_at,
                    n.tags AS tags, n.aliases AS aliases
             ORDER BY name, category, id"
        );
        let rows = self.executor.query(&cypher).fetch_all().await?;

        let mut groups: BTreeMap<(String, Option<String>), Vec<NodeHandle>> = BTreeMap::new();
        for row in &rows {
            let key = (row.get("name")?, row.get_opt("category")?);
            groups.entry(key).or_default().push(NodeHandle {
                id: row.get("id")?,
                created_at: row.get_opt("created_at")?,
                tags: row.get_or_default("tags")?,
                aliases: row.get_or_default("aliases")?,
            });
        }

        Ok(groups
            .into_iter()
            .map(|((name, category), nodes)| DuplicateGroup {
                name,
                category,
                nodes,
            })
            .collect())
    }

    async fn merge_node_sets(
        &self,
        survivor_id: &str,
        tags: &[String],
        aliases: &[String],
        now: &str,
    ) -> Result<(), AppError> {
        self.executor
            .query(
                "MATCH (n) WHERE elementId(n) = $id
                 SET n.tags = CASE WHEN size($tags) = 0 THEN n.tags ELSE $tags END,
                     n.aliases = CASE WHEN size($aliases) = 0 THEN n.aliases ELSE $aliases END,
                     n.updated_at = $now",
            )
            .param("id", survivor_id)
            .param("tags", tags)
            .param("aliases", aliases)
            .param("now", now)
            .run()
            .await
    }

    async fn redirect_edges(
        &self,
        duplicate_id: &str,
        survivor_id: &str,
        group_ids: &[String],
    ) -> Result<usize, AppError> {
        // Keyed by the original edge's id so a re-run does not double up
        let outgoing = self
            .executor
            .query(
                "MATCH (d) WHERE elementId(d) = $duplicate
                 MATCH (s) WHERE elementId(s) = $survivor
                 MATCH (d)-[r]->(o)
                 WHERE NOT elementId(o) IN $group AND type(r) <> 'MERGE_PENDING'
                 MERGE (s)-[p:MERGE_PENDING {merge_rel: elementId(r)}]->(o)
                 SET p += properties(r),
                     p.merge_original_type = type(r),
                     p.merge_from = $duplicate
                 RETURN count(p) AS redirected",
            )
            .param("duplicate", duplicate_id)
            .param("survivor", survivor_id)
            .param("group", group_ids)
            .fetch_count("redirected")
            .await?;

        let incoming = self
            .executor
            .query(
                "MATCH (d) WHERE elementId(d) = $duplicate
                 MATCH (s) WHERE elementId(s) = $survivor
                 MATCH (o)-[r]->(d)
                 WHERE NOT elementId(o) IN $group AND type(r) <> 'MERGE_PENDING'
                 MERGE (o)-[p:MERGE_PENDING {merge_rel: elementId(r)}]->(s)
                 SET p += properties(r),
                     p.merge_original_type = type(r),
                     p.merge_from = $duplicate
                 RETURN count(p) AS redirected",
            )
            .param("duplicate", duplicate_id)
            .param("survivor", survivor_id)
            .param("group", group_ids)
            .fetch_count("redirected")
            .await?;

        Ok((outgoing + incoming) as usize)
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<usize, AppError> {
        let deleted = self
            .executor
            .query(
                "MATCH (n) WHERE elementId(n) IN $ids
                 DETACH DELETE n
                 RETURN count(*) AS deleted",
            )
            .param("ids", ids)
            .fetch_count("deleted")
            .await?;

        Ok(deleted as usize)
    }

    async fn restore_pending_edges(&self, now: &str) -> Result<RestoreOutcome, AppError> {
        let rows = self
            .executor
            .query(
                "MATCH ()-[p:MERGE_PENDING]->()
                 WHERE p.merge_original_type IS NOT NULL
                 RETURN DISTINCT p.merge_original_type AS relation",
            )
            .fetch_all()
            .await?;

        let mut outcome = RestoreOutcome::default();
        for row in &rows {
            let relation: String = row.get("relation")?;
            let rel = checked_identifier(&relation)?;

            let count_cypher = format!("MATCH ()-[r:{rel}]->() RETURN count(r) AS edges");
            let before = self
                .executor
                .query(&count_cypher)
                .fetch_count("edges")
                .await?;

            // An identical edge already on the survivor absorbs the pending one
            let restore = format!(
                "MATCH (a)-[p:MERGE_PENDING {{merge_original_type: $relation}}]->(b)
                 MERGE (a)-[r:{rel}]->(b)
                 ON CREATE SET r = properties(p)
                 SET r.updated_at = $now
                 REMOVE r.merge_original_type, r.merge_rel, r.merge_from
                 DELETE p
                 RETURN count(*) AS moved"
            );
            let moved = self
                .executor
                .query(&restore)
                .param("relation", &relation)
                .param("now", now)
                .fetch_count("moved")
                .await?;

            let after = self
                .executor
                .query(&count_cypher)
                .fetch_count("edges")
                .await?;

            let restored = (after - before).max(0) as usize;
            outcome.restored += restored;
            outcome.collapsed += (moved as usize).saturating_sub(restored);
        }

        Ok(outcome)
    }

    async fn align_same_as(
        &self,
        category: Category,
        build_id: &str,
        now: &str,
    ) -> Result<AlignOutcome, AppError> {
        let cypher = format!(
            "MATCH (t:Term {{category: $category}})
             MATCH (n:{label})
             WHERE NOT n:Term AND coalesce(n.name, n.term) = t.name
             MERGE (n)-[r:SAME_AS]->(t)
             ON CREATE SET r.source = 'term_base',
                           r.build_id = $build_id,
                           r.created_at = $now,
                           r.confidence = 1.0,
                           r.inferred = false
             SET r.updated_at = $now
             RETURN count(r) AS linked,
                    sum(CASE WHEN r.build_id = $build_id THEN 1 ELSE 0 END) AS created",
            label = category.label(),
        );
        let row = self
            .executor
            .query(&cypher)
            .param("category", category.label())
            .param("build_id", build_id)
            .param("now", now)
            .fetch_one()
            .await?;

        let (linked, created) = match row {
            Some(row) => (
                row.get_opt::<i64>("linked")?.unwrap_or(0),
                row.get_opt::<i64>("created")?.unwrap_or(0),
            ),
            None => (0, 0),
        };
        Ok(AlignOutcome {
            created: created as usize,
            existing: (linked - created).max(0) as usize,
        })
    }
}
