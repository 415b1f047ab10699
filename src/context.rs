//! Application context providing dependency injection root.

use std::sync::Arc;

use crate::config::{Config, WriterConfig};
use crate::di::Context as ContextDerive;
use crate::graph::backends::neo4j::Neo4jClient;
use crate::models::SchemaConfig;
use crate::repositories::{AppStore, CypherRepository};

/// Root application context for dependency injection.
///
/// `#[derive(Context)]` makes every field resolvable through `FromRef`, so
/// services declare what they need and `FromContext` wires it up.
#[derive(ContextDerive, Clone)]
pub struct Context {
    /// Graph store all services read and write through.
    pub store: AppStore,
    /// Vocabulary, relation rules and inference shapes.
    pub schema: Arc<SchemaConfig>,
    /// Chunking and retry policy.
    pub writer: Arc<WriterConfig>,
}

impl Context {
    pub fn new(store: AppStore, config: &Config) -> Self {
        Self {
            store,
            schema: Arc::new(config.schema.clone()),
            writer: Arc::new(config.writer.clone()),
        }
    }

    /// Context over a Neo4j connection.
    pub fn with_neo4j(client: Neo4jClient, config: &Config) -> Self {
        Self::new(Arc::new(CypherRepository::new(client)), config)
    }
}
