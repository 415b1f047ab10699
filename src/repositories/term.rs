//! Cypher implementation of [`TermStore`].

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::error::AppError;
use crate::graph::{CypherExecutor, QueryExt, Row};
use crate::models::{alias_canonical_id, tag_canonical_id, Category, TaggedTerm, Term, TermKey};
use crate::repositories::{CypherRepository, TermStore, WriteOutcome, DEFAULT_LINK_SOURCE};

#[async_trait]
impl<E: CypherExecutor> TermStore for CypherRepository<E> {
    async fn upsert_term(
        &self,
        term: &Term,
        build_id: &str,
        now: &str,
    ) -> Result<WriteOutcome, AppError> {
        let category = term.category.label();
        let source = term.source.as_deref().unwrap_or(DEFAULT_LINK_SOURCE);

        let holder = self
            .executor
            .query(
                "MATCH (other:Term {canonical_id: $canonical_id})
                 WHERE other.name <> $name OR other.category <> $category
                 RETURN other.name AS name
                 LIMIT 1",
            )
            .param("canonical_id", &term.canonical_id)
            .param("name", &term.name)
            .param("category", category)
            .fetch_one()
            .await?;
        if let Some(row) = holder {
            return Ok(WriteOutcome::IdConflict {
                holder: row.get("name")?,
            });
        }

        // Optional attributes keep their stored value when the row omits them
        let cypher = format!(
            "OPTIONAL MATCH (existing:Term {{name: $name, category: $category}})
             WITH count(existing) > 0 AS existed
             MERGE (t:Term {{name: $name, category: $category}})
             ON CREATE SET t.canonical_id = $canonical_id, t.created_at = $now
             SET t:{label},
                 t.canonical_id = coalesce(t.canonical_id, $canonical_id),
                 t.tags = coalesce($tags, t.tags),
                 t.aliases = coalesce($aliases, t.aliases),
                 t.description = coalesce($description, t.description),
                 t.source = coalesce($source, t.source),
                 t.confidence = $confidence,
                 t.created_at = coalesce(t.created_at, $now),
                 t.updated_at = $now
             RETURN existed",
            label = category,
        );
        let row = self
            .executor
            .query(&cypher)
            .param("name", &term.name)
            .param("category", category)
            .param("canonical_id", &term.canonical_id)
            .param("tags", &term.tags)
            .param("aliases", &term.aliases)
            .param("description", &term.description)
            .param("source", &term.source)
            .param("confidence", term.confidence)
            .param("now", now)
            .fetch_one()
            .await?;
        let existed = match row {
            Some(row) => row.get::<bool>("existed")?,
            None => false,
        };

        self.executor
            .query(
                "MATCH (t:Term {name: $name, category: $category})
                 MERGE (c:Category {name: $category})
                 ON CREATE SET c.code = $code, c.created_at = $now
                 SET c.canonical_id = coalesce(c.canonical_id, $category_id)
                 MERGE (t)-[r:BELONGS_TO]->(c)
                 ON CREATE SET r.created_at = $now, r.build_id = $build_id,
                               r.source = $source, r.confidence = 1.0",
            )
            .param("name", &term.name)
            .param("category", category)
            .param("code", term.category.code())
            .param("category_id", term.category.node_canonical_id())
            .param("build_id", build_id)
            .param("source", source)
            .param("now", now)
            .run()
            .await?;

        if let Some(tags) = &term.tags {
            let names: Vec<&String> = tags.iter().collect();
            let nodes: Vec<JsonValue> = tags
                .iter()
                .map(|tag| json!({"name": tag, "canonical_id": tag_canonical_id(tag)}))
                .collect();
            self.executor
                .query(
                    "MATCH (t:Term {name: $name, category: $category})
                     OPTIONAL MATCH (t)-[old:HAS_TAG]->(g:Tag)
                     WHERE NOT g.name IN $names
                     DELETE old
                     WITH DISTINCT t
                     UNWIND $tags AS tag
                     MERGE (g:Tag {name: tag.name})
                     ON CREATE SET g.created_at = $now
                     SET g.canonical_id = coalesce(g.canonical_id, tag.canonical_id)
                     MERGE (t)-[r:HAS_TAG]->(g)
                     ON CREATE SET r.created_at = $now, r.build_id = $build_id,
                                   r.source = $source, r.confidence = 1.0",
                )
                .param("name", &term.name)
                .param("category", category)
                .param("names", &names)
                .param("tags", &nodes)
                .param("build_id", build_id)
                .param("source", source)
                .param("now", now)
                .run()
                .await?;
        }

        if let Some(aliases) = &term.aliases {
            let names: Vec<&String> = aliases.iter().collect();
            let nodes: Vec<JsonValue> = aliases
                .iter()
                .map(|alias| json!({"name": alias, "canonical_id": alias_canonical_id(alias)}))
                .collect();
            self.executor
                .query(
                    "MATCH (t:Term {name: $name, category: $category})
                     OPTIONAL MATCH (a:Alias)-[old:ALIAS_OF]->(t)
                     WHERE NOT a.name IN $names
                     DELETE old
                     WITH DISTINCT t
                     UNWIND $aliases AS alias
                     MERGE (a:Alias {name: alias.name})
                     ON CREATE SET a.created_at = $now
                     SET a.canonical_id = coalesce(a.canonical_id, alias.canonical_id)
                     MERGE (a)-[r:ALIAS_OF]->(t)
                     ON CREATE SET r.created_at = $now, r.build_id = $build_id,
                                   r.source = $source, r.confidence = 1.0",
                )
                .param("name", &term.name)
                .param("category", category)
                .param("names", &names)
                .param("aliases", &nodes)
                .param("build_id", build_id)
                .param("source", source)
                .param("now", now)
                .run()
                .await?;
        }

        Ok(if existed {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    async fn find_term(&self, key: &TermKey) -> Result<Option<TaggedTerm>, AppError> {
        let row = crate::cypher!(
            self.executor,
            "MATCH (t:Term {name: $name, category: $category})
             RETURN t.name AS name, t.category AS category, t.tags AS tags
             LIMIT 1",
            name = &key.name,
            category = key.category.label(),
        )
        .fetch_one()
        .await?;

        row.as_ref().map(row_to_tagged_term).transpose()
    }

    async fn terms_in_category(&self, category: Category) -> Result<Vec<TaggedTerm>, AppError> {
        let rows = self
            .executor
            .query(
                "MATCH (t:Term {category: $category})
                 RETURN t.name AS name, t.category AS category, t.tags AS tags
                 ORDER BY t.name",
            )
            .param("category", category.label())
            .fetch_all()
            .await?;

        rows.iter().map(row_to_tagged_term).collect()
    }

    async fn terms_missing_canonical_id(&self) -> Result<Vec<TermKey>, AppError> {
        let categories: Vec<&str> = Category::all().iter().map(|c| c.label()).collect();
        let rows = self
            .executor
            .query(
                "MATCH (t:Term)
                 WHERE t.canonical_id IS NULL AND t.category IN $categories
                 RETURN t.name AS name, t.category AS category
                 ORDER BY t.category, t.name",
            )
            .param("categories", &categories)
            .fetch_all()
            .await?;

        rows.iter()
            .map(|row| Ok(TermKey::new(row.get::<String>("name")?, row.get("category")?)))
            .collect()
    }

    async fn assign_canonical_id(
        &self,
        key: &TermKey,
        canonical_id: &str,
        now: &str,
    ) -> Result<bool, AppError> {
        let updated = self
            .executor
            .query(
                "MATCH (t:Term {name: $name, category: $category})
                 WHERE t.canonical_id IS NULL
                 SET t.canonical_id = $canonical_id,
                     t.created_at = coalesce(t.created_at, $now),
                     t.updated_at = coalesce(t.updated_at, $now)
                 RETURN count(t) AS updated",
            )
            .param("name", &key.name)
            .param("category", key.category.label())
            .param("canonical_id", canonical_id)
            .param("now", now)
            .fetch_count("updated")
            .await?;

        Ok(updated > 0)
    }
}

fn row_to_tagged_term(row: &Row) -> Result<TaggedTerm, AppError> {
    Ok(TaggedTerm {
        name: row.get("name")?,
        category: row.get("category")?,
        tags: row.get_or_default("tags")?,
    })
}
