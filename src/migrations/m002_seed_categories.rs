//! Migration 002: one `:Category` node per built-in category.

use futures::future::BoxFuture;
use futures::FutureExt;

use super::traits::{GraphMigrationContext, Migration};
use crate::error::AppError;
use crate::graph::Query;
use crate::models::Category;

pub struct M002SeedCategories;

impl Migration for M002SeedCategories {
    type Context = dyn GraphMigrationContext + Sync;

    fn id(&self) -> &'static str {
        "m002_seed_categories"
    }

    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Seed category nodes"
    }

    fn up<'a>(&'a self, ctx: &'a Self::Context) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            for category in Category::all() {
                Query::new(
                    ctx,
                    "MERGE (c:Category {name: $name})
                     SET c.code = coalesce(c.code, $code),
                         c.canonical_id = coalesce(c.canonical_id, $canonical_id),
                         c.description = coalesce(c.description, $description)",
                )
                .param("name", category.label())
                .param("canonical_id", category.node_canonical_id())
                .param("code", category.code())
                .param("description", category.description())
                .run()
                .await?;
            }
            tracing::info!("Seeded {} categories", Category::all().len());
            Ok(())
        }
        .boxed()
    }
}
