//! Pipeline stages built on the store traits.
//!
//! Services hold their dependencies as fields and are assembled from the
//! application [`Context`](crate::context::Context) with the `FromContext`
//! derive macro.

pub mod alignment;
pub mod audit;
pub mod canonical;
pub mod dedup;
pub mod inference;
pub mod relations;
pub mod validation;
pub mod writer;

pub use alignment::Aligner;
pub use audit::AuditService;
pub use canonical::{canonical_id, Canonicalizer, MalformedFact};
pub use dedup::{Deduplicator, DEFAULT_DEDUP_LABEL};
pub use inference::{InferenceEngine, InferenceOverrides};
pub use relations::RelationImporter;
pub use validation::{RelationRejection, RelationValidator};
pub use writer::UpsertWriter;
