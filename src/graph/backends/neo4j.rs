//! Neo4j backend implementation over the Bolt protocol (neo4rs).
//!
//! # Example
//!
//! ```ignore
//! use qualgraph::graph::backends::neo4j::Neo4jClient;
//! use qualgraph::graph::QueryExt;
//!
//! let client = Neo4jClient::connect("bolt://localhost:7687", "neo4j", "secret").await?;
//! let rows = client.query("MATCH (t:Term) RETURN t.name AS name LIMIT 10")
//!     .fetch_all()
//!     .await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, Txn};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::{CypherExecutor, GraphClient, Transaction};

/// Neo4j graph client.
///
/// Cheap to clone: `neo4rs::Graph` is a handle to a shared connection pool.
#[derive(Clone)]
pub struct Neo4jClient {
    graph: neo4rs::Graph,
}

impl Neo4jClient {
    /// Opens a connection pool to the given Bolt URI.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, AppError> {
        let graph = neo4rs::Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }
}

#[async_trait]
impl CypherExecutor for Neo4jClient {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        use async_stream::try_stream;

        let query = build_query(cypher, &params);
        let cypher = cypher.to_string();
        let graph = self.graph.clone();

        Ok(Box::pin(try_stream! {
            let mut rows = graph
                .execute(query)
                .await
                .map_err(|e| query_error(&cypher, e))?;
            while let Some(row) = rows.next().await.map_err(|e| query_error(&cypher, e))? {
                yield convert_row(&row, &cypher)?;
            }
        }))
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        self.graph
            .run(build_query(cypher, &params))
            .await
            .map_err(|e| query_error(cypher, e))
    }
}

#[async_trait]
impl GraphClient for Neo4jClient {
    type Tx<'a> = Neo4jTransaction;

    async fn begin(&self) -> Result<Self::Tx<'_>, AppError> {
        let txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| AppError::Transaction(format!("failed to begin transaction: {}", e)))?;
        Ok(Neo4jTransaction {
            txn: Mutex::new(Some(txn)),
        })
    }
}

/// An explicit Neo4j transaction.
///
/// The driver needs `&mut Txn` for every statement, so the handle sits
/// behind an async mutex; statements inside one transaction run in order.
/// Result rows are buffered because they cannot outlive the lock.
pub struct Neo4jTransaction {
    txn: Mutex<Option<Txn>>,
}

impl Neo4jTransaction {
    async fn take(&self) -> Result<Txn, AppError> {
        self.txn
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Transaction("transaction already finished".to_string()))
    }
}

#[async_trait]
impl CypherExecutor for Neo4jTransaction {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        let mut guard = self.txn.lock().await;
        let txn = guard
            .as_mut()
            .ok_or_else(|| AppError::Transaction("transaction already finished".to_string()))?;

        let mut stream = txn
            .execute(build_query(cypher, &params))
            .await
            .map_err(|e| query_error(cypher, e))?;

        let mut rows = Vec::new();
        while let Some(row) = stream
            .next(txn.handle())
            .await
            .map_err(|e| query_error(cypher, e))?
        {
            rows.push(convert_row(&row, cypher));
        }

        Ok(Box::pin(futures::stream::iter(rows)))
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        let mut guard = self.txn.lock().await;
        let txn = guard
            .as_mut()
            .ok_or_else(|| AppError::Transaction("transaction already finished".to_string()))?;
        txn.run(build_query(cypher, &params))
            .await
            .map_err(|e| query_error(cypher, e))
    }
}

#[async_trait]
impl Transaction for Neo4jTransaction {
    async fn commit(self) -> Result<(), AppError> {
        self.take()
            .await?
            .commit()
            .await
            .map_err(|e| AppError::Transaction(format!("failed to commit transaction: {}", e)))
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.take()
            .await?
            .rollback()
            .await
            .map_err(|e| AppError::Transaction(format!("failed to rollback transaction: {}", e)))
    }
}

impl Drop for Neo4jTransaction {
    fn drop(&mut self) {
        if self.txn.get_mut().is_some() {
            tracing::warn!("Neo4jTransaction dropped without commit or rollback");
        }
    }
}

fn query_error(cypher: &str, err: neo4rs::Error) -> AppError {
    AppError::Query {
        message: format!("Cypher query failed: {}", err),
        query: cypher.to_string(),
    }
}

/// Binds JSON parameters as Bolt values.
fn build_query(cypher: &str, params: &Params) -> neo4rs::Query {
    params
        .iter()
        .fold(neo4rs::query(cypher), |query, (name, value)| {
            query.param(name, json_to_bolt(value))
        })
}

fn json_to_bolt(value: &JsonValue) -> BoltType {
    match value {
        JsonValue::Null => BoltType::Null(BoltNull),
        JsonValue::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        JsonValue::String(s) => BoltType::String(BoltString::new(s)),
        JsonValue::Array(items) => {
            BoltType::List(BoltList::from(items.iter().map(json_to_bolt).collect::<Vec<_>>()))
        }
        JsonValue::Object(map) => {
            let mut bolt = BoltMap::new();
            for (key, value) in map {
                bolt.put(BoltString::new(key), json_to_bolt(value));
            }
            BoltType::Map(bolt)
        }
    }
}

/// Converts a driver row into a JSON-valued [`Row`].
///
/// Queries in this crate return scalars, lists and maps only, never whole
/// nodes, so every column has a faithful JSON form.
fn convert_row(row: &neo4rs::Row, cypher: &str) -> Result<Row, AppError> {
    row.to::<HashMap<String, JsonValue>>()
        .map(Row::new)
        .map_err(|e| AppError::Query {
            message: format!("failed to decode row: {}", e),
            query: cypher.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_bolt_scalars() {
        assert!(matches!(json_to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(json_to_bolt(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(json_to_bolt(&json!(3)), BoltType::Integer(_)));
        assert!(matches!(json_to_bolt(&json!(0.75)), BoltType::Float(_)));
        assert!(matches!(json_to_bolt(&json!("外观")), BoltType::String(_)));
    }

    #[test]
    fn test_json_to_bolt_nested() {
        let bolt = json_to_bolt(&json!({"tags": ["外观", "异常现象"], "confidence": 0.85}));
        match bolt {
            BoltType::Map(map) => {
                assert!(matches!(
                    map.value.get(&BoltString::new("tags")),
                    Some(BoltType::List(_))
                ));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}
