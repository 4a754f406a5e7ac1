//! Lazily expanded site → subject → visit → form → field tree.
//!
//! A [`HierarchyCache`] belongs to one session and is passed explicitly to
//! the [`HierarchyTree`] operations that need it.

pub mod cache;
pub mod node;
pub mod tree;

pub use cache::{CacheKey, CacheStats, HierarchyCache};
pub use node::HierarchyNode;
pub use tree::HierarchyTree;
