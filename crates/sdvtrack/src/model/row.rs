//! Typed rows parsed out of a chunk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::columns::{MAX_EXTRA_ATTRIBUTES, MAX_EXTRA_VALUE_CHARS};
use super::key::CompositeKey;

/// Columns outside the required set, keyed by normalized header name.
///
/// Bounded to [`MAX_EXTRA_ATTRIBUTES`] entries; values longer than
/// [`MAX_EXTRA_VALUE_CHARS`] are truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraAttributes(BTreeMap<String, String>);

impl ExtraAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an attribute. Returns `false` when the map is full and the
    /// name is not already present.
    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        if self.0.len() >= MAX_EXTRA_ATTRIBUTES && !self.0.contains_key(name) {
            return false;
        }
        let value: String = value.trim().chars().take(MAX_EXTRA_VALUE_CHARS).collect();
        self.0.insert(name.to_string(), value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One row of a primary extract: an expected data point.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryRow {
    /// 1-based data row number within the file (header excluded).
    pub row_number: u64,
    pub key: CompositeKey,
    /// Value as entered; may be blank.
    pub value: String,
    pub entered_by: Option<String>,
    pub entered_date: Option<String>,
    pub extra: ExtraAttributes,
}

/// One row of a verification extract: evidence that a data point was checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRow {
    /// 1-based data row number within the file (header excluded).
    pub row_number: u64,
    pub key: CompositeKey,
    pub verified_by: Option<String>,
    pub verified_date: Option<String>,
    pub verification_status: Option<String>,
    pub extra: ExtraAttributes,
}

impl VerificationRow {
    /// Whether two rows for the same key carry different verification metadata.
    pub fn conflicts_with(&self, other: &VerificationRow) -> bool {
        self.verified_by != other.verified_by
            || self.verified_date != other.verified_date
            || self.verification_status != other.verification_status
    }
}

/// Rows of a single chunk, tagged by role.
#[derive(Debug, Clone)]
pub enum ChunkRows {
    Primary(Vec<PrimaryRow>),
    Verification(Vec<VerificationRow>),
}

impl ChunkRows {
    pub fn len(&self) -> usize {
        match self {
            ChunkRows::Primary(rows) => rows.len(),
            ChunkRows::Verification(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns a trimmed cell into `None` when blank.
pub fn optional_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
