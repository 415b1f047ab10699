//! Init command handler.

use color_eyre::Result;

use crate::migrations::run_migrations;

use super::{connect, print_json, App};

impl App {
    /// Run the init command to bring the schema up to date.
    pub async fn run_init(&self) -> Result<()> {
        let (_, client) = connect().await?;

        tracing::info!("Running migrations...");
        let result = run_migrations(&client)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Migration failed: {}", e))?;

        if result.applied_migrations.is_empty() {
            tracing::info!(
                "Database already at v{}, no migrations needed",
                result.current_version
            );
        } else {
            tracing::info!(
                "Migrations complete: v{} -> v{}, applied: {:?}",
                result.previous_version,
                result.current_version,
                result.applied_migrations
            );
        }

        print_json(&result)
    }
}
