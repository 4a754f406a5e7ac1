//! Hierarchy levels, filters and the scopes queries run over.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::record_repo::Condition;
use crate::model::{fold_case, normalize_component};

/// The five fixed hierarchy levels, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Site,
    Subject,
    Visit,
    Form,
    Field,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Site,
        Level::Subject,
        Level::Visit,
        Level::Form,
        Level::Field,
    ];

    /// Record column this level groups by.
    pub fn column(&self) -> &'static str {
        match self {
            Level::Site => "site",
            Level::Subject => "subject",
            Level::Visit => "visit",
            Level::Form => "form",
            Level::Field => "field",
        }
    }

    /// 0 for sites through 4 for fields.
    pub fn depth(&self) -> usize {
        *self as usize
    }

    pub fn from_depth(depth: usize) -> Option<Level> {
        Self::ALL.get(depth).copied()
    }

    pub fn next(&self) -> Option<Level> {
        Self::from_depth(self.depth() + 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Optional restrictions on the four outer levels. Blank values mean
/// "no filter"; matching is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub visit: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
}

/// Case-folded identity of a filter set; equal signatures select the same
/// records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterSignature([Option<String>; 4]);

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(normalize_component)
        .filter(|v| !v.is_empty())
}

impl Filters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn site(mut self, value: impl Into<String>) -> Self {
        self.site = Some(value.into());
        self
    }

    pub fn subject(mut self, value: impl Into<String>) -> Self {
        self.subject = Some(value.into());
        self
    }

    pub fn visit(mut self, value: impl Into<String>) -> Self {
        self.visit = Some(value.into());
        self
    }

    pub fn form(mut self, value: impl Into<String>) -> Self {
        self.form = Some(value.into());
        self
    }

    /// Whitespace-normalized copy with blank values dropped.
    pub fn normalized(&self) -> Self {
        Self {
            site: clean(&self.site),
            subject: clean(&self.subject),
            visit: clean(&self.visit),
            form: clean(&self.form),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized() == Self::default()
    }

    pub fn signature(&self) -> FilterSignature {
        let n = self.normalized();
        let fold = |v: Option<String>| v.map(|s| fold_case(&s));
        FilterSignature([fold(n.site), fold(n.subject), fold(n.visit), fold(n.form)])
    }

    fn push_conditions(&self, out: &mut Vec<(&'static str, String)>) {
        let n = self.normalized();
        let pairs = [
            (Level::Site, n.site),
            (Level::Subject, n.subject),
            (Level::Visit, n.visit),
            (Level::Form, n.form),
        ];
        for (level, value) in pairs {
            if let Some(value) = value {
                out.push((level.column(), value));
            }
        }
    }
}

/// Values identifying a node, outermost first. The empty path is the root;
/// a path of length `n` names a node at depth `n - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from values, normalizing each. Paths deeper than the
    /// field level are truncated.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            values
                .into_iter()
                .take(Level::ALL.len())
                .map(|v| normalize_component(v.as_ref()))
                .collect(),
        )
    }

    pub fn child(&self, value: &str) -> Self {
        let mut values = self.0.clone();
        values.push(normalize_component(value));
        Self(values)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Level of the node this path names; `None` for the root.
    pub fn level(&self) -> Option<Level> {
        self.0.len().checked_sub(1).and_then(Level::from_depth)
    }

    /// Level of this node's children; `None` below fields.
    pub fn child_level(&self) -> Option<Level> {
        Level::from_depth(self.0.len())
    }

    /// Case-folded form used for cache keys.
    pub fn folded(&self) -> Vec<String> {
        self.0.iter().map(|v| fold_case(v)).collect()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&self.0.join("/"))
        }
    }
}

/// Records under an ancestor path, further restricted by filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    pub path: NodePath,
    pub filters: Filters,
}

impl Scope {
    pub fn new(path: NodePath, filters: Filters) -> Self {
        Self { path, filters }
    }

    pub fn filtered(filters: Filters) -> Self {
        Self {
            path: NodePath::root(),
            filters,
        }
    }

    /// Column equalities selecting the scope's records.
    pub fn conditions(&self) -> Vec<(&'static str, String)> {
        let mut out: Vec<(&'static str, String)> = self
            .path
            .values()
            .iter()
            .zip(Level::ALL)
            .map(|(value, level)| (level.column(), value.clone()))
            .collect();
        self.filters.push_conditions(&mut out);
        out
    }
}

/// Borrows owned conditions in the shape the record repository takes.
pub(crate) fn borrow_conditions<'a>(owned: &'a [(&'static str, String)]) -> Vec<Condition<'a>> {
    owned.iter().map(|(c, v)| (*c, v.as_str())).collect()
}
