use std::sync::Arc;

use serde::Serialize;

use crate::aggregate::{Level, NodePath, Rollup, RollupRow};
use crate::model::eq_folded;

/// One node of the hierarchy. Immutable: updates produce a new node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub level: Level,
    /// Full path to this node, its own value last.
    pub path: NodePath,
    pub label: String,
    #[serde(flatten)]
    pub rollup: Rollup,
    /// False for field nodes, which cannot be expanded.
    pub has_children: bool,
    pub collapsed: bool,
    /// `None` until the node is first expanded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Arc<[HierarchyNode]>>,
}

impl HierarchyNode {
    pub fn from_row(parent: &NodePath, level: Level, row: RollupRow) -> Self {
        Self {
            level,
            path: parent.child(&row.value),
            label: row.value,
            rollup: row.rollup,
            has_children: level.next().is_some(),
            collapsed: false,
            children: None,
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.children.is_some() && !self.collapsed
    }

    /// Whether this node is the one `value` names at its level.
    pub fn matches(&self, value: &str) -> bool {
        eq_folded(&self.label, value)
    }

    pub fn expanded_with(&self, children: Arc<[HierarchyNode]>) -> Self {
        Self {
            children: Some(children),
            collapsed: false,
            ..self.clone()
        }
    }

    /// Collapsed copy; loaded children are kept.
    pub fn collapsed(&self) -> Self {
        Self {
            collapsed: true,
            ..self.clone()
        }
    }

    /// Copy carrying a replacement child list, other state unchanged.
    pub(crate) fn with_children(&self, children: Arc<[HierarchyNode]>) -> Self {
        Self {
            children: Some(children),
            ..self.clone()
        }
    }
}
