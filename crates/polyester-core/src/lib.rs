//! Core domain types shared by every other polyester crate: the operation
//! record, the state model, cache-key hashing, and the plan graph with its
//! resolver/topological sort.

pub mod hash;
pub mod operation;
pub mod plan;
pub mod state;

pub use hash::{cache_key, canonical_json, sha256_hex};
pub use operation::OperationRecord;
pub use plan::{Plan, PlanError};
pub use state::{FileSnapshot, State, StateEntry, States, StatesEntry};

/// Errors produced while manipulating core domain values (not I/O, not
/// subprocess failures — those live closer to where they occur).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode value as canonical JSON: {0}")]
    Canonicalize(#[from] serde_json::Error),
}
