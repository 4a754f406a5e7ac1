//! Reconciles parsed rows into the canonical record set.

pub mod consolidation;
pub mod engine;

pub use consolidation::Consolidator;
pub use engine::{ChunkOutcome, MergeConflict, MergeContext, MergeEngine};
