//! Maintenance, rollback and audit command handlers.

use color_eyre::Result;

use crate::di::FromRef;
use crate::models::Category;
use crate::services::{Aligner, AuditService, Deduplicator, UpsertWriter};

use super::{cancel_on_ctrl_c, context, print_json, App};

impl App {
    pub async fn run_dedup(&self, label: &str, dry_run: bool) -> Result<()> {
        let ctx = context().await?;
        let dedup = Deduplicator::from_ref(&ctx);

        if dry_run {
            let groups = dedup.find_duplicates(label).await?;
            tracing::info!(label, groups = groups.len(), "Dry run, nothing merged");
            return print_json(&groups);
        }

        let report = dedup.deduplicate(label, &cancel_on_ctrl_c()).await?;
        print_json(&report)
    }

    pub async fn run_align(&self, categories: &[Category]) -> Result<()> {
        let ctx = context().await?;
        let report = Aligner::from_ref(&ctx)
            .align(categories, &cancel_on_ctrl_c())
            .await?;
        print_json(&report)
    }

    pub async fn run_rollback(&self, build_id: &str) -> Result<()> {
        let ctx = context().await?;
        let report = AuditService::from_ref(&ctx).rollback(build_id).await?;
        print_json(&report)
    }

    pub async fn run_builds(&self) -> Result<()> {
        let ctx = context().await?;
        let builds = AuditService::from_ref(&ctx).builds().await?;
        print_json(&builds)
    }

    pub async fn run_audit(&self) -> Result<()> {
        let ctx = context().await?;
        let audit = AuditService::from_ref(&ctx).audit().await?;
        print_json(&audit)
    }

    pub async fn run_backfill(&self) -> Result<()> {
        let ctx = context().await?;
        let report = UpsertWriter::from_ref(&ctx)
            .backfill_canonical_ids(&cancel_on_ctrl_c())
            .await?;
        print_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use crate::cli::{App, Command};
    use crate::models::Category;
    use clap::Parser;

    #[test]
    fn test_align_accepts_repeated_categories() {
        let app = App::try_parse_from([
            "qualgraph",
            "align",
            "--category",
            "Component",
            "--category",
            "sym",
        ])
        .unwrap();
        let Command::Align { categories } = app.command else {
            panic!("expected align command");
        };
        assert_eq!(categories, vec![Category::Component, Category::Symptom]);
    }

    #[test]
    fn test_dedup_defaults_to_term_label() {
        let app = App::try_parse_from(["qualgraph", "dedup", "--dry-run"]).unwrap();
        let Command::Dedup { label, dry_run } = app.command else {
            panic!("expected dedup command");
        };
        assert_eq!(label, "Term");
        assert!(dry_run);
    }

    #[test]
    fn test_unknown_category_is_refused() {
        assert!(App::try_parse_from(["qualgraph", "align", "--category", "Planet"]).is_err());
    }
}
