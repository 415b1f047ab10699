//! Idempotent, chunked writes of Terms and edges.
//!
//! Facts are split into fixed-size chunks, each written in its own
//! transaction. A chunk whose transaction fails is retried and then
//! reported with its facts; later chunks still run. Every fact is a
//! merge-by-key, so replaying a chunk is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WriterConfig;
use crate::context::Context;
use crate::di::FromContext;
use crate::error::AppError;
use crate::models::{new_build_id, EdgeFact, FailedChunk, RawRow, Report, Term, TermKey};
use crate::repositories::{AppStore, EdgeOutcome, StoreTransaction, WriteOutcome};
use crate::services::canonical::{canonical_id, Canonicalizer};

/// What happened to one fact inside a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Created,
    Updated,
    Skipped,
    Rejected(String),
}

/// Something the writer can persist inside a transaction.
#[async_trait]
pub trait Fact: Serialize + Send + Sync {
    async fn apply(&self, tx: &dyn StoreTransaction, now: &str) -> Result<Applied, AppError>;
}

/// A Term together with the ingest run that writes it.
#[derive(Debug, Clone, Serialize)]
struct TermFact {
    #[serde(flatten)]
    term: Term,
    build_id: String,
}

#[async_trait]
impl Fact for TermFact {
    async fn apply(&self, tx: &dyn StoreTransaction, now: &str) -> Result<Applied, AppError> {
        Ok(match tx.upsert_term(&self.term, &self.build_id, now).await? {
            WriteOutcome::Created => Applied::Created,
            WriteOutcome::Updated => Applied::Updated,
            WriteOutcome::IdConflict { holder } => Applied::Rejected(format!(
                "canonical id {} already belongs to {} term '{}'",
                self.term.canonical_id, self.term.category, holder
            )),
        })
    }
}

#[async_trait]
impl Fact for EdgeFact {
    async fn apply(&self, tx: &dyn StoreTransaction, now: &str) -> Result<Applied, AppError> {
        Ok(match tx.upsert_edge(self, now).await? {
            EdgeOutcome::Created => Applied::Created,
            EdgeOutcome::Updated => Applied::Updated,
            EdgeOutcome::Preserved => Applied::Skipped,
            EdgeOutcome::MissingEndpoint => Applied::Rejected(format!(
                "endpoint not found: {} or {}",
                self.source, self.target
            )),
        })
    }
}

/// A canonical id to fill in on a Term that predates key derivation.
#[derive(Debug, Clone, Serialize)]
struct Backfill {
    key: TermKey,
    canonical_id: String,
}

#[async_trait]
impl Fact for Backfill {
    async fn apply(&self, tx: &dyn StoreTransaction, now: &str) -> Result<Applied, AppError> {
        let assigned = tx
            .assign_canonical_id(&self.key, &self.canonical_id, now)
            .await?;
        Ok(if assigned {
            Applied::Updated
        } else {
            Applied::Skipped
        })
    }
}

/// Chunked, retrying writer shared by every pipeline stage.
#[derive(FromContext, Clone)]
pub struct UpsertWriter {
    store: AppStore,
    config: Arc<WriterConfig>,
    canonicalizer: Canonicalizer,
}

impl UpsertWriter {
    pub fn new(store: AppStore, config: Arc<WriterConfig>, canonicalizer: Canonicalizer) -> Self {
        Self {
            store,
            config,
            canonicalizer,
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Canonicalizes raw rows and upserts the resulting Terms.
    ///
    /// Malformed rows are rejected individually and never reach the store.
    /// Links created by the run carry its `ingest-<ulid>` build id.
    pub async fn upsert_entities(&self, rows: &[RawRow], cancel: &CancellationToken) -> Report {
        let build_id = new_build_id("ingest");
        let mut report = Report::new("ingest").with_build_id(&build_id);
        let mut terms = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match self.canonicalizer.canonicalize(row) {
                Ok(term) => terms.push(TermFact {
                    term,
                    build_id: build_id.clone(),
                }),
                Err(reason) => {
                    warn!(row = index, %reason, "Skipping malformed row");
                    report.reject(row, reason);
                }
            }
        }

        report.absorb(self.write_facts("ingest", &terms, cancel).await);
        report
    }

    pub async fn write_edges(
        &self,
        operation: &str,
        edges: &[EdgeFact],
        cancel: &CancellationToken,
    ) -> Report {
        self.write_facts(operation, edges, cancel).await
    }

    /// Assigns canonical ids to Terms that have none.
    pub async fn backfill_canonical_ids(&self, cancel: &CancellationToken) -> Result<Report, AppError> {
        let missing = self.store.terms_missing_canonical_id().await?;
        info!(count = missing.len(), "Backfilling canonical ids");
        let facts: Vec<Backfill> = missing
            .into_iter()
            .map(|key| Backfill {
                canonical_id: canonical_id(key.category, &key.name),
                key,
            })
            .collect();
        Ok(self.write_facts("backfill", &facts, cancel).await)
    }

    /// Writes `facts` chunk by chunk; see the module docs for failure handling.
    pub async fn write_facts<F: Fact>(
        &self,
        operation: &str,
        facts: &[F],
        cancel: &CancellationToken,
    ) -> Report {
        let chunk_size = self.config.effective_chunk_size();
        let mut report = Report::new(operation);

        for (index, chunk) in facts.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(operation, chunk = index, "Batch cancelled, stopping before chunk");
                report.aborted = true;
                break;
            }

            let mut attempt = 0;
            loop {
                match self.write_chunk(chunk).await {
                    Ok(written) => {
                        debug!(operation, chunk = index, created = written.created, "Chunk committed");
                        report.absorb(written);
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt < self.config.retries => {
                        attempt += 1;
                        warn!(operation, chunk = index, attempt, error = %err, "Chunk failed, retrying");
                    }
                    Err(err) => {
                        error!(operation, chunk = index, error = %err, "Chunk failed");
                        report.failed_chunks.push(FailedChunk {
                            index,
                            items: chunk
                                .iter()
                                .map(|fact| serde_json::to_value(fact).unwrap_or_default())
                                .collect(),
                            error: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        info!(
            operation,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            rejected = report.rejected.len(),
            failed_chunks = report.failed_chunks.len(),
            "Batch finished"
        );
        report
    }

    async fn write_chunk<F: Fact>(&self, chunk: &[F]) -> Result<Report, AppError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.store.begin().await?;
        let mut report = Report::default();

        for fact in chunk {
            match fact.apply(tx.as_ref(), &now).await {
                Ok(Applied::Created) => report.created += 1,
                Ok(Applied::Updated) => report.updated += 1,
                Ok(Applied::Skipped) => report.skipped += 1,
                Ok(Applied::Rejected(reason)) => {
                    warn!(%reason, "Fact rejected by store");
                    report.reject(fact, reason);
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(err);
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SchemaConfig};
    use crate::repositories::{MemoryStore, TermStore};
    use serde_json::json;

    fn writer(store: &MemoryStore, chunk_size: usize) -> UpsertWriter {
        UpsertWriter::new(
            Arc::new(store.clone()),
            Arc::new(WriterConfig {
                chunk_size,
                retries: 1,
            }),
            Canonicalizer::new(Arc::new(SchemaConfig::default())),
        )
    }

    fn rows(names: &[&str]) -> Vec<RawRow> {
        names
            .iter()
            .map(|name| match json!({"name": name, "category": "Component", "tags": ["显示"]}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_entities_is_idempotent() {
        let store = MemoryStore::new();
        let writer = writer(&store, 2);
        let input = rows(&["屏幕", "摄像头", "电池盖"]);

        let first = writer.upsert_entities(&input, &CancellationToken::new()).await;
        let second = writer.upsert_entities(&input, &CancellationToken::new()).await;

        assert_eq!(first.created, 3);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(store.node_count("Term"), 3);
        assert_eq!(store.edges_of_type("HAS_TAG").len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_rows_do_not_abort_batch() {
        let store = MemoryStore::new();
        let mut input = rows(&["屏幕"]);
        input.push(match json!({"name": "", "category": "Component"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        });

        let report = writer(&store, 10)
            .upsert_entities(&input, &CancellationToken::new())
            .await;

        assert_eq!(report.created, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, "missing name");
    }

    #[tokio::test]
    async fn test_failed_commit_is_retried_once() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);

        let report = writer(&store, 10)
            .upsert_entities(&rows(&["屏幕", "摄像头"]), &CancellationToken::new())
            .await;

        assert!(report.failed_chunks.is_empty());
        assert_eq!(report.created, 2);
    }

    #[tokio::test]
    async fn test_chunk_reported_after_second_failure() {
        let store = MemoryStore::new();
        store.fail_next_commits(2);

        let report = writer(&store, 2)
            .upsert_entities(&rows(&["a", "b", "c", "d", "e"]), &CancellationToken::new())
            .await;

        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].index, 0);
        assert_eq!(report.failed_chunks[0].items.len(), 2);
        assert_eq!(report.created, 3);
        assert_eq!(store.node_count("Term"), 3);
    }

    #[tokio::test]
    async fn test_cancelled_batch_stops_between_chunks() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = writer(&store, 2)
            .upsert_entities(&rows(&["a", "b", "c"]), &cancel)
            .await;

        assert!(report.aborted);
        assert_eq!(report.created, 0);
        assert_eq!(store.node_count("Term"), 0);
    }

    #[tokio::test]
    async fn test_backfill_assigns_missing_ids() {
        let store = MemoryStore::new();
        store.insert_node(&["Term", "Tool"], json!({"name": "卡尺", "category": "Tool"}));

        let writer = writer(&store, 10);
        let report = writer
            .backfill_canonical_ids(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let key = TermKey::new("卡尺", Category::Tool);
        let props = store.term_props(&key).unwrap();
        assert_eq!(props["canonical_id"], json!(canonical_id(Category::Tool, "卡尺")));
        assert!(props.contains_key("created_at"));
        assert!(store.terms_missing_canonical_id().await.unwrap().is_empty());
    }
}
