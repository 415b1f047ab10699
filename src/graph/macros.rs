//! Macro for convenient Cypher query construction.

/// Shorthand for creating a parameterized query.
///
/// # Usage
///
/// ```ignore
/// use qualgraph::graph::cypher;
///
/// let rows = cypher!(
///     executor,
///     "MATCH (t:Term {name: $name, category: $category}) RETURN t.tags AS tags",
///     name = key.name,
///     category = key.category.label()
/// )
/// .fetch_all()
/// .await?;
/// ```
#[macro_export]
macro_rules! cypher {
    // Query without parameters
    ($graph:expr, $query:expr) => {
        $graph.query($query)
    };
    // Query with parameters
    ($graph:expr, $query:expr, $($name:ident = $value:expr),+ $(,)?) => {
        $graph.query($query)$(.param(stringify!($name), $value))+
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::error::AppError;
    use crate::graph::query::QueryExt;
    use crate::graph::row::{Params, RowStream};
    use crate::graph::traits::CypherExecutor;

    #[derive(Default)]
    struct CapturingExecutor {
        params: Mutex<Option<Params>>,
    }

    #[async_trait::async_trait]
    impl CypherExecutor for CapturingExecutor {
        async fn execute_cypher(
            &self,
            _cypher: &str,
            params: Params,
        ) -> Result<RowStream<'_>, AppError> {
            *self.params.lock().unwrap() = Some(params);
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn run_cypher(&self, _cypher: &str, params: Params) -> Result<(), AppError> {
            *self.params.lock().unwrap() = Some(params);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cypher_macro_binds_named_params() {
        let executor = CapturingExecutor::default();
        let build_id = "tag-overlap-1";
        cypher!(
            executor,
            "MATCH ()-[r]->() WHERE r.build_id = $build_id DELETE r",
            build_id = build_id,
            limit = 10,
        )
        .run()
        .await
        .unwrap();

        let params = executor.params.lock().unwrap().take().unwrap();
        assert_eq!(params.get("build_id"), Some(&serde_json::json!("tag-overlap-1")));
        assert_eq!(params.get("limit"), Some(&serde_json::json!(10)));
    }

    #[tokio::test]
    async fn test_cypher_macro_no_params() {
        let executor = CapturingExecutor::default();
        cypher!(executor, "MATCH (n) RETURN n").fetch_all().await.unwrap();
        let params = executor.params.lock().unwrap().take().unwrap();
        assert!(params.is_empty());
    }
}
