//! Migration 003: `canonical_id` on Category, Tag and Alias nodes.
//!
//! Nodes written before attribute nodes carried an id get one here. The
//! hash is computed client-side, so names are read first and written back
//! in one `UNWIND` per label.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use super::traits::{GraphMigrationContext, Migration};
use crate::error::AppError;
use crate::graph::Query;
use crate::models::hashed_id;

/// `(label, id code)`; labels are fixed identifiers, safe to splice.
const LABELS: &[(&str, &str)] = &[("Category", "CAT"), ("Tag", "TAG"), ("Alias", "ALS")];

pub struct M003NodeCanonicalIds;

impl Migration for M003NodeCanonicalIds {
    type Context = dyn GraphMigrationContext + Sync;

    fn id(&self) -> &'static str {
        "m003_node_canonical_ids"
    }

    fn version(&self) -> u32 {
        3
    }

    fn description(&self) -> &'static str {
        "Backfill canonical ids on Category, Tag and Alias nodes"
    }

    fn up<'a>(&'a self, ctx: &'a Self::Context) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            for (label, code) in LABELS {
                let rows = Query::new(
                    ctx,
                    &format!(
                        "MATCH (n:{label}) WHERE n.canonical_id IS NULL
                         RETURN n.name AS name"
                    ),
                )
                .fetch_all()
                .await?;

                let mut nodes = Vec::with_capacity(rows.len());
                for row in &rows {
                    let Some(name) = row.get_opt::<String>("name")? else {
                        continue;
                    };
                    nodes.push(json!({"name": name, "canonical_id": hashed_id(code, label, &name)}));
                }
                if nodes.is_empty() {
                    continue;
                }

                Query::new(
                    ctx,
                    &format!(
                        "UNWIND $nodes AS node
                         MATCH (n:{label} {{name: node.name}})
                         WHERE n.canonical_id IS NULL
                         SET n.canonical_id = node.canonical_id"
                    ),
                )
                .param("nodes", &nodes)
                .run()
                .await?;
                tracing::info!(label, count = nodes.len(), "Backfilled canonical ids");
            }
            Ok(())
        }
        .boxed()
    }
}
