//! Rollup statistics over canonical records.

pub mod aggregator;
pub mod rollup;
pub mod scope;

pub use aggregator::{Aggregator, RollupSource};
pub use rollup::{Rollup, RollupRow, Summary};
pub use scope::{FilterSignature, Filters, Level, NodePath, Scope};
