//! Query builder for fluent Cypher query construction.

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::CypherExecutor;

/// A builder for constructing and executing Cypher queries.
///
/// A parameter that fails to serialize does not panic: the error is held
/// and returned by whichever terminal method runs the query.
///
/// # Example
///
/// ```ignore
/// let rows = Query::new(&client, "MATCH (t:Term {name: $name}) RETURN t.tags AS tags")
///     .param("name", "电池盖裂纹")
///     .fetch_all()
///     .await?;
/// ```
pub struct Query<'a, E: CypherExecutor + ?Sized> {
    executor: &'a E,
    cypher: String,
    params: Params,
    error: Option<AppError>,
}

impl<'a, E: CypherExecutor + ?Sized> Query<'a, E> {
    /// Creates a new query builder.
    pub fn new(executor: &'a E, cypher: &str) -> Self {
        Self {
            executor,
            cypher: cypher.to_string(),
            params: Params::new(),
            error: None,
        }
    }

    /// Adds a parameter to the query, referenced in Cypher as `$name`.
    pub fn param<T: Serialize>(mut self, name: &str, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(json_value) => {
                self.params.insert(name.to_string(), json_value);
            }
            Err(e) => {
                self.error.get_or_insert(AppError::Query {
                    message: format!("failed to serialize parameter '{}': {}", name, e),
                    query: self.cypher.clone(),
                });
            }
        }
        self
    }

    /// Adds a parameter that's already a JSON value.
    pub fn param_raw(mut self, name: &str, value: JsonValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    /// Executes the query and returns a stream of rows.
    pub async fn execute(self) -> Result<RowStream<'a>, AppError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.executor
            .execute_cypher(&self.cypher, self.params)
            .await
    }

    /// Executes the query and collects all rows into a vector.
    pub async fn fetch_all(self) -> Result<Vec<Row>, AppError> {
        self.execute().await?.try_collect().await
    }

    /// Executes the query and returns the first row, if any.
    pub async fn fetch_one(self) -> Result<Option<Row>, AppError> {
        let mut stream = self.execute().await?;
        stream.next().await.transpose()
    }

    /// Executes the query and reads a single integer column from the first
    /// row, treating "no row" as zero.
    pub async fn fetch_count(self, column: &str) -> Result<i64, AppError> {
        match self.fetch_one().await? {
            Some(row) => Ok(row.get_opt::<i64>(column)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Executes the query without returning results.
    pub async fn run(self) -> Result<(), AppError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.executor.run_cypher(&self.cypher, self.params).await
    }
}

/// Extension trait providing `executor.query("...")`.
pub trait QueryExt: CypherExecutor {
    /// Creates a new query builder for this executor.
    fn query(&self, cypher: &str) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(self, cypher)
    }
}

impl<E: CypherExecutor> QueryExt for E {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every call and replays canned rows.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Params)>>,
        rows: Vec<HashMap<String, JsonValue>>,
    }

    #[async_trait::async_trait]
    impl CypherExecutor for RecordingExecutor {
        async fn execute_cypher(
            &self,
            cypher: &str,
            params: Params,
        ) -> Result<RowStream<'_>, AppError> {
            self.calls.lock().unwrap().push((cypher.to_string(), params));
            let rows: Vec<Result<Row, AppError>> =
                self.rows.iter().cloned().map(|r| Ok(Row::new(r))).collect();
            Ok(Box::pin(futures::stream::iter(rows)))
        }

        async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
            self.calls.lock().unwrap().push((cypher.to_string(), params));
            Ok(())
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("nope"))
        }
    }

    #[tokio::test]
    async fn test_query_with_params() {
        let executor = RecordingExecutor::default();

        executor
            .query("MATCH (t:Term {name: $name}) RETURN t LIMIT $limit")
            .param("name", "电池盖裂纹")
            .param("limit", 5)
            .fetch_all()
            .await
            .unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.get("name"), Some(&json!("电池盖裂纹")));
        assert_eq!(calls[0].1.get("limit"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_fetch_count_reads_first_row() {
        let executor = RecordingExecutor {
            rows: vec![HashMap::from([("deleted".to_string(), json!(7))])],
            ..Default::default()
        };
        let count = executor
            .query("MATCH ()-[r]->() DELETE r RETURN count(r) AS deleted")
            .fetch_count("deleted")
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn test_fetch_count_defaults_to_zero() {
        let executor = RecordingExecutor::default();
        let count = executor.query("RETURN 1").fetch_count("n").await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_bad_param_fails_without_running() {
        let executor = RecordingExecutor::default();
        let result = executor
            .query("CREATE (n {x: $x})")
            .param("x", Unserializable)
            .run()
            .await;

        assert!(matches!(result, Err(AppError::Query { .. })));
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
