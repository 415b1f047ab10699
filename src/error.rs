//! Application error types.
//!
//! `AppError` covers failures of the machinery itself (store, config, IO).
//! Per-item problems in a batch (a malformed row, an illegal relation) are
//! not errors at this level: they are reported as rejections and the batch
//! carries on.

use thiserror::Error;

/// Application-level errors for qualgraph.
#[derive(Error, Debug)]
pub enum AppError {
    // Neo4j errors
    #[error("Neo4j connection error: {0}")]
    Connection(#[from] neo4rs::Error),

    #[error("Neo4j query error: {message}")]
    Query { message: String, query: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    // Domain errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    // Input errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same work could plausibly succeed.
    ///
    /// Store and transaction failures are transient from the writer's point
    /// of view; everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Connection(_) | AppError::Query { .. } | AppError::Transaction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_retryable() {
        let err = AppError::Query {
            message: "deadlock".to_string(),
            query: "MERGE (n)".to_string(),
        };
        assert!(err.is_retryable());
        assert!(AppError::Transaction("commit failed".to_string()).is_retryable());
    }

    #[test]
    fn test_domain_errors_are_not_retryable() {
        assert!(!AppError::Validation("bad".to_string()).is_retryable());
        assert!(!AppError::Internal("bug".to_string()).is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = AppError::Validation("unknown category 'Planet'".to_string());
        assert_eq!(err.to_string(), "Validation error: unknown category 'Planet'");
    }
}
