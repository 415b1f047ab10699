//! Backend implementations for graph databases.
//!
//! Each backend implements the core traits from [`crate::graph::traits`]:
//!
//! - [`CypherExecutor`](crate::graph::CypherExecutor) - for the client and its transactions
//! - [`Transaction`](crate::graph::Transaction) - commit/rollback
//! - [`GraphClient`](crate::graph::GraphClient) - hands out transactions
//!
//! # Available Backends
//!
//! | Backend | Module | Status |
//! |---------|--------|--------|
//! | Neo4j (Bolt) | [`neo4j`] | Available |

pub mod neo4j;
