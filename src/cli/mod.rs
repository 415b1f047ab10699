//! CLI module for qualgraph.
//!
//! Subcommands:
//! - `init`: apply schema migrations
//! - `ingest`: canonicalize and upsert entity rows
//! - `import-relations`: validate and write curated relations
//! - `infer`: derive relations from tag overlap
//! - `dedup`, `align`, `backfill`: graph maintenance
//! - `rollback`, `builds`, `audit`: build inventory and edge health
//!
//! Every command prints its result as pretty JSON on stdout; logs go to
//! stderr.

mod infer;
mod ingest;
mod init;
mod maintenance;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::Context;
use crate::graph::backends::neo4j::Neo4jClient;
use crate::models::Category;

pub use infer::InferArgs;
pub use ingest::read_records;

/// qualgraph - quality-engineering knowledge graph
#[derive(Parser)]
#[command(name = "qualgraph")]
#[command(about = "Build and maintain a quality-engineering knowledge graph in Neo4j")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply pending schema migrations and seed categories
    Init,

    /// Upsert entity rows from a JSON array or JSONL file
    Ingest {
        /// Input file
        file: PathBuf,
    },

    /// Validate and write relations from a JSON array or JSONL file
    ImportRelations {
        /// Input file
        file: PathBuf,

        /// Validate only; write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Infer RELATED_TO edges from shared tags
    Infer(InferArgs),

    /// Merge nodes sharing the same name and category
    Dedup {
        /// Label to scan
        #[arg(long, default_value = crate::services::DEFAULT_DEDUP_LABEL)]
        label: String,

        /// List duplicate groups without merging
        #[arg(long)]
        dry_run: bool,
    },

    /// Link business nodes to their Term with SAME_AS
    Align {
        /// Category to align (repeatable; default all)
        #[arg(long = "category")]
        categories: Vec<Category>,
    },

    /// Delete every edge created by a build
    Rollback {
        /// Build id, e.g. tag-overlap-01J...
        build_id: String,
    },

    /// List edge counts per build and relation type
    Builds,

    /// Summarize edge confidence, duplicates and orphan terms
    Audit,

    /// Fill missing canonical ids and timestamps on Terms
    Backfill,
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Init => self.run_init().await,
            Command::Ingest { ref file } => self.run_ingest(file).await,
            Command::ImportRelations { ref file, dry_run } => {
                self.run_import_relations(file, dry_run).await
            }
            Command::Infer(ref args) => self.run_infer(args).await,
            Command::Dedup { ref label, dry_run } => self.run_dedup(label, dry_run).await,
            Command::Align { ref categories } => self.run_align(categories).await,
            Command::Rollback { ref build_id } => self.run_rollback(build_id).await,
            Command::Builds => self.run_builds().await,
            Command::Audit => self.run_audit().await,
            Command::Backfill => self.run_backfill().await,
        }
    }
}

/// Loads configuration and opens the Neo4j connection pool.
async fn connect() -> Result<(Config, Neo4jClient)> {
    let config = Config::load()?;
    tracing::info!("Connecting to Neo4j at {}", config.neo4j.uri);
    let client = Neo4jClient::connect(
        &config.neo4j.uri,
        &config.neo4j.user,
        config.neo4j.password.as_deref().unwrap_or(""),
    )
    .await
    .map_err(|e| color_eyre::eyre::eyre!("Failed to connect: {}", e))?;
    tracing::info!("Connected to Neo4j");
    Ok((config, client))
}

/// Application context over a fresh Neo4j connection.
async fn context() -> Result<Context> {
    let (config, client) = connect().await?;
    Ok(Context::with_neo4j(client, &config))
}

/// Token cancelled on the first Ctrl-C.
///
/// Batch operations finish the chunk in flight and report `aborted`.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current chunk");
            child.cancel();
        }
    });
    token
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
