//! Dependency injection infrastructure.
//!
//! Services are plain structs whose fields are resolved from the
//! application [`Context`](crate::context::Context):
//!
//! - [`FromRef<T>`]: extract a value from `&T`
//! - `#[derive(Context)]`: makes each field of the context extractable
//! - `#[derive(FromContext)]`: builds a service by extracting each field
//!
//! ```ignore
//! use qualgraph::di::FromRef;
//! use qualgraph::services::InferenceEngine;
//!
//! let ctx = Context::with_neo4j(client, &config);
//! let engine = InferenceEngine::from_ref(&ctx);
//! ```

/// Extract a value from a reference to another type.
pub trait FromRef<T> {
    fn from_ref(input: &T) -> Self;
}

/// Any Clone type can be extracted from itself.
impl<T: Clone> FromRef<T> for T {
    fn from_ref(input: &T) -> Self {
        input.clone()
    }
}

pub use di_macros::{Context, FromContext};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{Config, Neo4jConfig};
    use crate::context::Context as AppContext;
    use crate::repositories::MemoryStore;
    use crate::services::{RelationImporter, UpsertWriter};

    fn config() -> Config {
        Config {
            neo4j: Neo4jConfig {
                uri: "bolt://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: None,
            },
            writer: Default::default(),
            schema: Default::default(),
        }
    }

    #[test]
    fn test_services_resolve_from_context() {
        let mut config = config();
        config.writer.chunk_size = 7;
        let ctx = AppContext::new(Arc::new(MemoryStore::new()), &config);

        let writer = UpsertWriter::from_ref(&ctx);
        assert_eq!(writer.config().chunk_size, 7);

        // Nested services resolve through the same context.
        let _importer = RelationImporter::from_ref(&ctx);
    }
}
