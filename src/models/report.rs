//! Batch report returned by every bulk operation.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An input item that was not written, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub item: JsonValue,
    pub reason: String,
}

/// A chunk whose transaction failed even after the retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedChunk {
    pub index: usize,
    pub items: Vec<JsonValue>,
    pub error: String,
}

/// Best-effort outcome of a batch.
///
/// A batch never fails as a whole because of bad input: bad items land in
/// `rejected`, failed transactions in `failed_chunks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub rejected: Vec<Rejection>,
    pub failed_chunks: Vec<FailedChunk>,
    pub aborted: bool,
}

impl Report {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    pub fn reject(&mut self, item: impl Serialize, reason: impl std::fmt::Display) {
        self.rejected.push(Rejection {
            item: serde_json::to_value(item).unwrap_or(JsonValue::Null),
            reason: reason.to_string(),
        });
    }

    /// Folds another report's counters and findings into this one.
    pub fn absorb(&mut self, other: Report) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.rejected.extend(other.rejected);
        self.failed_chunks.extend(other.failed_chunks);
        self.aborted |= other.aborted;
    }

    /// Number of facts that reached the store.
    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failed_chunks.is_empty() && !self.aborted
    }
}
