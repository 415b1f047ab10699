//! Duplicate node detection and two-phase merge.
//!
//! Phase 1 copies each duplicate's edges onto the survivor as temporary
//! `MERGE_PENDING` edges that remember their original type. Phase 2
//! deletes the duplicates and turns the temporary edges back into real
//! ones. A crash between the phases leaves only temporary edges behind,
//! which the next run restores before doing anything else.
//!
//! Must not run concurrently with an ingest: it changes node identity.

use std::collections::BTreeSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::Context;
use crate::di::FromContext;
use crate::error::AppError;
use crate::models::Report;
use crate::repositories::{AppStore, DuplicateGroup, NodeHandle};

/// Default label scanned for duplicates.
pub const DEFAULT_DEDUP_LABEL: &str = "Term";

#[derive(FromContext, Clone)]
pub struct Deduplicator {
    store: AppStore,
}

impl Deduplicator {
    pub fn new(store: AppStore) -> Self {
        Self { store }
    }

    pub async fn find_duplicates(&self, label: &str) -> Result<Vec<DuplicateGroup>, AppError> {
        self.store.duplicate_groups(label).await
    }

    /// Merges every duplicate group of `label` into its survivor.
    ///
    /// `deleted` counts removed duplicates, `updated` the survivors, and
    /// `created` the edges moved onto them. Edges the survivor already had
    /// are counted as `skipped`.
    pub async fn deduplicate(&self, label: &str, cancel: &CancellationToken) -> Result<Report, AppError> {
        let mut report = Report::new("dedup");

        let leftover = self.store.restore_pending_edges(&now()).await?;
        if leftover.restored + leftover.collapsed > 0 {
            warn!(
                restored = leftover.restored,
                collapsed = leftover.collapsed,
                "Restored merge edges left by an interrupted run"
            );
            report.created += leftover.restored;
            report.skipped += leftover.collapsed;
        }

        let groups = self.store.duplicate_groups(label).await?;
        info!(label, groups = groups.len(), "Found duplicate groups");

        for group in &groups {
            if cancel.is_cancelled() {
                warn!(label, "Dedup cancelled between groups");
                report.aborted = true;
                break;
            }
            let Some(survivor) = pick_survivor(&group.nodes) else {
                continue;
            };
            let group_ids: Vec<String> = group.nodes.iter().map(|n| n.id.clone()).collect();
            let duplicates: Vec<String> = group_ids
                .iter()
                .filter(|id| **id != survivor.id)
                .cloned()
                .collect();

            let tags: BTreeSet<String> = group.nodes.iter().flat_map(|n| n.tags.clone()).collect();
            let aliases: BTreeSet<String> = group
                .nodes
                .iter()
                .flat_map(|n| n.aliases.clone())
                .filter(|a| *a != group.name)
                .collect();
            let tags: Vec<String> = tags.into_iter().collect();
            let aliases: Vec<String> = aliases.into_iter().collect();
            self.store
                .merge_node_sets(&survivor.id, &tags, &aliases, &now())
                .await?;

            let mut redirected = 0;
            for duplicate in &duplicates {
                redirected += self
                    .store
                    .redirect_edges(duplicate, &survivor.id, &group_ids)
                    .await?;
            }

            report.deleted += self.store.delete_nodes(&duplicates).await?;
            let restored = self.store.restore_pending_edges(&now()).await?;
            report.created += restored.restored;
            report.skipped += restored.collapsed;
            report.updated += 1;

            info!(
                name = %group.name,
                survivor = %survivor.id,
                duplicates = duplicates.len(),
                redirected,
                "Merged duplicate group"
            );
        }

        Ok(report)
    }
}

/// The oldest node wins; missing timestamps lose; ties keep store order.
pub fn pick_survivor(nodes: &[NodeHandle]) -> Option<&NodeHandle> {
    nodes.iter().min_by(|a, b| match (&a.created_at, &b.created_at) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
