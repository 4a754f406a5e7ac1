//! Session view of the hierarchy: which nodes are loaded and expanded.

use std::sync::Arc;

use crate::aggregate::{Filters, NodePath};
use crate::error::HierarchyError;
use crate::hierarchy::cache::HierarchyCache;
use crate::hierarchy::node::HierarchyNode;

/// Tree of immutable nodes. Every update rebuilds the path from the root
/// to the touched node and shares all other subtrees.
#[derive(Debug, Clone)]
pub struct HierarchyTree {
    filters: Filters,
    roots: Arc<[HierarchyNode]>,
}

impl HierarchyTree {
    /// Loads the site level under `filters`.
    pub fn load(cache: &HierarchyCache, filters: Filters) -> Result<Self, HierarchyError> {
        let filters = filters.normalized();
        let roots = cache.roots(&filters)?;
        Ok(Self { filters, roots })
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn roots(&self) -> &[HierarchyNode] {
        &self.roots
    }

    /// The loaded node at `path`, if any.
    pub fn node(&self, path: &NodePath) -> Option<&HierarchyNode> {
        let mut values = path.values().iter();
        let first = values.next()?;
        let mut node = self.roots.iter().find(|n| n.matches(first))?;
        for value in values {
            node = node.children.as_deref()?.iter().find(|n| n.matches(value))?;
        }
        Some(node)
    }

    /// Expands the node at `path` and returns its children.
    ///
    /// Children come from the cache, so expanding a node whose children were
    /// loaded before (by this tree, a prefetch, or another tree sharing the
    /// cache) issues no query. A collapsed node re-expands with the children
    /// it kept, even if the cache has evicted them since. Expanding the root
    /// returns the site level.
    pub fn expand(
        &mut self,
        cache: &HierarchyCache,
        path: &NodePath,
    ) -> Result<Arc<[HierarchyNode]>, HierarchyError> {
        if path.is_root() {
            return Ok(Arc::clone(&self.roots));
        }
        let retained = match self.node(path) {
            Some(node) => node.children.clone(),
            None => return Err(HierarchyError::NodeNotFound(path.to_string())),
        };

        let children = match retained {
            Some(kept) => cache.reopen(path, &self.filters, &kept),
            None => cache.children(path, &self.filters)?,
        };
        let roots = replace(&self.roots, path.values(), &|node| {
            node.expanded_with(Arc::clone(&children))
        })
        .ok_or_else(|| HierarchyError::NodeNotFound(path.to_string()))?;
        self.roots = roots;
        Ok(children)
    }

    /// Marks the node at `path` collapsed. Its children stay loaded.
    ///
    /// Returns `false` when no such node is loaded.
    pub fn collapse(&mut self, path: &NodePath) -> bool {
        if path.is_root() {
            return false;
        }
        match replace(&self.roots, path.values(), &HierarchyNode::collapsed) {
            Some(roots) => {
                self.roots = roots;
                true
            }
            None => false,
        }
    }

    /// Reloads the tree under new filters. Expansion state is discarded.
    pub fn set_filters(
        &mut self,
        cache: &HierarchyCache,
        filters: Filters,
    ) -> Result<(), HierarchyError> {
        *self = Self::load(cache, filters)?;
        Ok(())
    }
}

/// Rebuilds `nodes` with the node at `path` replaced by `update(node)`.
fn replace(
    nodes: &Arc<[HierarchyNode]>,
    path: &[String],
    update: &dyn Fn(&HierarchyNode) -> HierarchyNode,
) -> Option<Arc<[HierarchyNode]>> {
    let (head, rest) = path.split_first()?;
    let index = nodes.iter().position(|n| n.matches(head))?;
    let target = &nodes[index];

    let replacement = if rest.is_empty() {
        update(target)
    } else {
        let children = target.children.as_ref()?;
        target.with_children(replace(children, rest, update)?)
    };

    let mut rebuilt = nodes.to_vec();
    rebuilt[index] = replacement;
    Some(Arc::from(rebuilt))
}
