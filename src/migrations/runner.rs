//! Migration runner with version tracking on a `:SchemaVersion` node.

use crate::error::AppError;
use crate::graph::{CypherExecutor, GraphClient, Query, Transaction};
use crate::migrations::create_register;

/// Result of running migrations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationResult {
    /// Schema version before migrations ran.
    pub previous_version: u32,
    /// Schema version after migrations ran.
    pub current_version: u32,
    /// IDs of the migrations applied by this run.
    pub applied_migrations: Vec<String>,
}

/// Run all pending migrations.
///
/// Only migrations with a version above the stored one are applied, so
/// running this on an up-to-date database is a no-op.
pub async fn run_migrations<C>(client: &C) -> Result<MigrationResult, AppError>
where
    C: GraphClient + 'static,
    for<'a> C::Tx<'a>: CypherExecutor + 'static,
{
    ensure_schema_version(client).await?;
    let previous_version = get_schema_version(client).await?;

    let register = create_register();
    let (current_version, applied_migrations) = register
        .run_pending(client, previous_version, |version, id| {
            update_schema_version(client, version, id)
        })
        .await?;

    Ok(MigrationResult {
        previous_version,
        current_version,
        applied_migrations,
    })
}

async fn ensure_schema_version<C>(client: &C) -> Result<(), AppError>
where
    C: GraphClient,
    for<'a> C::Tx<'a>: CypherExecutor,
{
    let now = chrono::Utc::now().to_rfc3339();
    let txn = client.begin().await?;
    Query::new(
        &txn,
        "MERGE (sv:SchemaVersion {id: 'schema_version'})
         ON CREATE SET sv.version = 0, sv.applied_migrations = [], sv.created_at = $now",
    )
    .param("now", &now)
    .run()
    .await?;
    txn.commit().await?;
    Ok(())
}

async fn get_schema_version<C>(client: &C) -> Result<u32, AppError>
where
    C: GraphClient,
    for<'a> C::Tx<'a>: CypherExecutor,
{
    let txn = client.begin().await?;
    let version = Query::new(
        &txn,
        "MATCH (sv:SchemaVersion {id: 'schema_version'}) RETURN sv.version AS version",
    )
    .fetch_count("version")
    .await?;
    txn.commit().await?;

    Ok(u32::try_from(version).unwrap_or(0))
}

async fn update_schema_version<C>(
    client: &C,
    version: u32,
    migration_id: &str,
) -> Result<(), AppError>
where
    C: GraphClient,
    for<'a> C::Tx<'a>: CypherExecutor,
{
    let now = chrono::Utc::now().to_rfc3339();
    let txn = client.begin().await?;
    Query::new(
        &txn,
        "MATCH (sv:SchemaVersion {id: 'schema_version'})
         SET sv.version = $version,
             sv.applied_migrations = sv.applied_migrations + [$migration_id],
             sv.last_applied_at = $now",
    )
    .param("version", i64::from(version))
    .param("migration_id", migration_id)
    .param("now", &now)
    .run()
    .await?;
    txn.commit().await?;
    Ok(())
}
