//! Migration 001: uniqueness constraints and lookup indexes.

use futures::future::BoxFuture;
use futures::FutureExt;

use super::traits::{GraphMigrationContext, Migration};
use crate::error::AppError;
use crate::graph::Query;

/// Term identity is `(name, category)`; `canonical_id` is derived from it
/// and must be unique too.
const STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT term_identity IF NOT EXISTS
     FOR (t:Term) REQUIRE (t.name, t.category) IS UNIQUE",
    "CREATE CONSTRAINT term_canonical_id IF NOT EXISTS
     FOR (t:Term) REQUIRE t.canonical_id IS UNIQUE",
    "CREATE CONSTRAINT category_name IF NOT EXISTS
     FOR (c:Category) REQUIRE c.name IS UNIQUE",
    "CREATE CONSTRAINT tag_name IF NOT EXISTS
     FOR (t:Tag) REQUIRE t.name IS UNIQUE",
    "CREATE CONSTRAINT alias_name IF NOT EXISTS
     FOR (a:Alias) REQUIRE a.name IS UNIQUE",
    "CREATE INDEX term_category IF NOT EXISTS FOR (t:Term) ON (t.category)",
    "CREATE INDEX term_source IF NOT EXISTS FOR (t:Term) ON (t.source)",
];

pub struct M001Constraints;

impl Migration for M001Constraints {
    type Context = dyn GraphMigrationContext + Sync;

    fn id(&self) -> &'static str {
        "m001_constraints"
    }

    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Term, Category, Tag and Alias constraints"
    }

    fn up<'a>(&'a self, ctx: &'a Self::Context) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            for statement in STATEMENTS {
                Query::new(ctx, statement).run().await?;
            }
            tracing::info!("Created {} constraints and indexes", STATEMENTS.len());
            Ok(())
        }
        .boxed()
    }
}
