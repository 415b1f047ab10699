//! Domain models for the knowledge graph.

mod category;
mod relation;
mod report;
mod schema;
mod term;

pub use category::Category;
pub use relation::{
    EdgeFact, EdgeProps, NodeRef, RelationInput, RelationInputProps, RelationType, TermKey,
};
pub use report::{FailedChunk, Rejection, Report};
pub use schema::{CategoryPair, InferenceShape, RelationRule, SchemaConfig};
pub use term::{
    alias_canonical_id, generate_ulid, hashed_id, new_build_id, tag_canonical_id, RawRow,
    TaggedTerm, Term,
};
