//! Migration traits and registry.

use futures::future::BoxFuture;

use crate::error::AppError;
use crate::graph::{CypherExecutor, GraphClient, Transaction as _};

/// Anything a migration can run Cypher against.
pub trait GraphMigrationContext: CypherExecutor + Send + Sync {}
impl<T: CypherExecutor + Send + Sync> GraphMigrationContext for T {}

/// Base migration trait with explicit lifetime-bounded future.
/// Uses BoxFuture to avoid `'static` requirements from `#[async_trait]`.
pub trait Migration: Send + Sync {
    type Context: ?Sized + Sync;

    fn id(&self) -> &'static str;
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up<'a>(&'a self, ctx: &'a Self::Context) -> BoxFuture<'a, Result<(), AppError>>;
}

pub trait GraphMigration: Migration<Context = dyn GraphMigrationContext + Sync> {}
impl<T: Migration<Context = dyn GraphMigrationContext + Sync>> GraphMigration for T {}

/// Ordered set of migrations.
pub struct Register<T: ?Sized> {
    migrations: Vec<Box<T>>,
}

impl Register<dyn GraphMigration> {
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    pub fn register(mut self, migration: impl GraphMigration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn GraphMigration> {
        self.migrations.iter().map(|m| m.as_ref())
    }

    /// Run all pending migrations above `current_version`.
    ///
    /// Each migration runs in its own transaction; Neo4j refuses schema and
    /// data statements in the same one. The version callback runs after each
    /// commit so a later failure keeps earlier progress recorded.
    pub async fn run_pending<C, F, Fut>(
        &self,
        client: &C,
        current_version: u32,
        mut on_applied: F,
    ) -> Result<(u32, Vec<String>), AppError>
    where
        C: GraphClient + 'static,
        for<'a> C::Tx<'a>: CypherExecutor + 'static,
        F: FnMut(u32, &'static str) -> Fut,
        Fut: std::future::Future<Output = Result<(), AppError>>,
    {
        let mut applied = vec![];
        let mut new_version = current_version;

        for migration in &self.migrations {
            if migration.version() <= current_version {
                continue;
            }

            tracing::info!(
                "Applying migration {} (v{}): {}",
                migration.id(),
                migration.version(),
                migration.description()
            );

            let txn = client.begin().await?;
            match migration.up(&txn).await {
                Ok(()) => txn.commit().await?,
                Err(e) => {
                    tracing::error!("Migration {} failed: {}", migration.id(), e);
                    txn.rollback().await?;
                    return Err(e);
                }
            }

            on_applied(migration.version(), migration.id()).await?;
            new_version = migration.version();
            applied.push(migration.id().to_string());
        }

        Ok((new_version, applied))
    }
}

impl Default for Register<dyn GraphMigration> {
    fn default() -> Self {
        Self::new()
    }
}
