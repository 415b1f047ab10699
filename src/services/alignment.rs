//! SAME_AS cross-links from business nodes to the term base.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::Context;
use crate::di::FromContext;
use crate::error::AppError;
use crate::models::{new_build_id, Category, Report, SchemaConfig};
use crate::repositories::AppStore;

const BUILD_PREFIX: &str = "term-align";

/// Links nodes carrying a category label (but not `:Term`) to the Term of
/// the same name and category, without merging the two.
#[derive(FromContext, Clone)]
pub struct Aligner {
    store: AppStore,
    schema: Arc<SchemaConfig>,
}

impl Aligner {
    pub fn new(store: AppStore, schema: Arc<SchemaConfig>) -> Self {
        Self { store, schema }
    }

    /// Aligns the given categories, or every configured one when empty.
    ///
    /// New links count as `created`; links from earlier runs as `updated`.
    pub async fn align(
        &self,
        categories: &[Category],
        cancel: &CancellationToken,
    ) -> Result<Report, AppError> {
        let categories = if categories.is_empty() {
            self.schema.categories.as_slice()
        } else {
            categories
        };
        let build_id = new_build_id(BUILD_PREFIX);
        let mut report = Report::new("align").with_build_id(&build_id);

        for category in categories {
            if cancel.is_cancelled() {
                warn!(%category, "Alignment cancelled");
                report.aborted = true;
                break;
            }
            let now = Utc::now().to_rfc3339();
            let outcome = self.store.align_same_as(*category, &build_id, &now).await?;
            info!(
                %category,
                created = outcome.created,
                existing = outcome.existing,
                "Aligned business nodes"
            );
            report.created += outcome.created;
            report.updated += outcome.existing;
        }

        Ok(report)
    }
}
