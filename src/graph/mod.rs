//! Graph abstraction layer for backend-agnostic database access.
//!
//! # Architecture
//!
//! - [`CypherExecutor`] - Execute parameterized Cypher (clients and transactions)
//! - [`Transaction`] - Transaction lifecycle (commit/rollback)
//! - [`GraphClient`] - Connection management and transaction creation
//!
//! # Usage
//!
//! ```ignore
//! use qualgraph::graph::{GraphClient, QueryExt, Transaction};
//!
//! // Query with parameters
//! let rows = client.query("MATCH (t:Term {category: $category}) RETURN t.name AS name")
//!     .param("category", "Symptom")
//!     .fetch_all()
//!     .await?;
//!
//! // Several writes as one unit
//! let txn = client.begin().await?;
//! txn.query("MERGE (c:Category {name: $name})")
//!     .param("name", "Symptom")
//!     .run()
//!     .await?;
//! txn.commit().await?;
//! ```

mod macros;
mod query;
mod row;
mod traits;

pub mod backends;

// Re-export core types
pub use query::{Query, QueryExt};
pub use row::{Params, Row, RowStream};
pub use traits::{CypherExecutor, GraphClient, Transaction};

// Re-export macro (defined at crate root via #[macro_export])
#[doc(inline)]
pub use crate::cypher;
