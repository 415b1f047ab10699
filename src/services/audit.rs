//! Build inventory, rollback and edge health checks.

use tracing::info;

use crate::context::Context;
use crate::di::FromContext;
use crate::error::AppError;
use crate::models::Report;
use crate::repositories::{AppStore, BuildSummary, EdgeAudit};

#[derive(FromContext, Clone)]
pub struct AuditService {
    store: AppStore,
}

impl AuditService {
    pub fn new(store: AppStore) -> Self {
        Self { store }
    }

    /// Deletes exactly the edges created under `build_id`.
    ///
    /// Edges created by other runs keep existing even if this run last
    /// refreshed them.
    pub async fn rollback(&self, build_id: &str) -> Result<Report, AppError> {
        let build_id = build_id.trim();
        if build_id.is_empty() {
            return Err(AppError::Validation("build id must not be empty".to_string()));
        }
        let deleted = self.store.delete_edges_by_build_id(build_id).await?;
        info!(build_id, deleted, "Rolled back build");

        let mut report = Report::new("rollback").with_build_id(build_id);
        report.deleted = deleted;
        Ok(report)
    }

    pub async fn builds(&self) -> Result<Vec<BuildSummary>, AppError> {
        self.store.build_summaries().await
    }

    pub async fn audit(&self) -> Result<EdgeAudit, AppError> {
        self.store.audit_edges().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::repositories::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_rollback_only_touches_one_build() {
        let store = MemoryStore::new();
        let a = store.insert_node(&["Term"], json!({"name": "a"}));
        let b = store.insert_node(&["Term"], json!({"name": "b"}));
        let c = store.insert_node(&["Term"], json!({"name": "c"}));
        store.insert_edge(&a, "RELATED_TO", &b, json!({"build_id": "tag-overlap-1"}));
        store.insert_edge(&a, "RELATED_TO", &c, json!({"build_id": "tag-overlap-1"}));
        store.insert_edge(&b, "RELATED_TO", &c, json!({"build_id": "tag-overlap-2"}));
        store.insert_edge(&c, "CAUSES", &a, json!({"inferred": false}));

        let audit = AuditService::new(Arc::new(store.clone()));
        let report = audit.rollback("tag-overlap-1").await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(store.edges_of_type("RELATED_TO").len(), 1);
        assert_eq!(store.edges_of_type("CAUSES").len(), 1);

        let builds = audit.builds().await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].build_id, "tag-overlap-2");
    }

    #[tokio::test]
    async fn test_rollback_requires_build_id() {
        let audit = AuditService::new(Arc::new(MemoryStore::new()));
        assert!(audit.rollback("  ").await.is_err());
    }
}
