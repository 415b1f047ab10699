//! qualgraph - quality-engineering knowledge graph
//!
//! Turns loosely structured quality records into a deduplicated Neo4j graph
//! of canonical Terms, evidence-bearing relations between them, and
//! relations inferred from shared tags, with every write tagged by build so
//! it can be audited and rolled back.

pub mod cli;
pub mod config;
pub mod context;
pub mod di;
pub mod error;
pub mod graph;
pub mod migrations;
pub mod models;
pub mod repositories;
pub mod services;

// Re-export FromRef at crate root for di-macros generated code
pub use di::FromRef;
