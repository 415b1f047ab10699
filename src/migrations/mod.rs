//! Schema migrations with version tracking.
//!
//! Migrations are:
//! - **Idempotent**: `IF NOT EXISTS` and `MERGE` + `coalesce`, so a retry is safe
//! - **Forward-only**: no down migrations
//! - **Version-tracked**: the applied version lives on a `:SchemaVersion` node
//! - **Applied by `init`**: the CLI runs pending migrations before anything else

mod m001_constraints;
mod m002_seed_categories;
mod m003_node_canonical_ids;
mod runner;
mod traits;

pub use m001_constraints::M001Constraints;
pub use m002_seed_categories::M002SeedCategories;
pub use m003_node_canonical_ids::M003NodeCanonicalIds;
pub use runner::{run_migrations, MigrationResult};
pub use traits::{GraphMigration, GraphMigrationContext, Migration, Register};

/// All migrations in version order.
pub fn create_register() -> Register<dyn GraphMigration> {
    Register::new()
        .register(M001Constraints)
        .register(M002SeedCategories)
        .register(M003NodeCanonicalIds)
}
