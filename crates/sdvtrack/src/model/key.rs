use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one verifiable data point.
///
/// Components are stored whitespace-normalized but with their original case.
/// Equality for matching purposes goes through [`CompositeKey::match_key`],
/// which folds case with [`fold_case`], the same rule the `FOLD` collation
/// on the record key columns applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub site: String,
    pub subject: String,
    pub visit: String,
    pub form: String,
    pub field: String,
}

/// Case-folded form of a [`CompositeKey`], used for in-memory matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey([String; 5]);

impl CompositeKey {
    /// Builds a key from raw cell values.
    ///
    /// Returns the name of the first blank component as the error.
    pub fn from_raw(
        site: &str,
        subject: &str,
        visit: &str,
        form: &str,
        field: &str,
    ) -> Result<Self, &'static str> {
        let site = non_blank(site, "site")?;
        let subject = non_blank(subject, "subject")?;
        let visit = non_blank(visit, "visit")?;
        let form = non_blank(form, "form")?;
        let field = non_blank(field, "field")?;
        Ok(Self {
            site,
            subject,
            visit,
            form,
            field,
        })
    }

    pub fn match_key(&self) -> MatchKey {
        MatchKey([
            fold_case(&self.site),
            fold_case(&self.subject),
            fold_case(&self.visit),
            fold_case(&self.form),
            fold_case(&self.field),
        ])
    }

    /// The subject this key belongs to, case-folded: `(site, subject)`.
    pub fn subject_key(&self) -> (String, String) {
        (fold_case(&self.site), fold_case(&self.subject))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.site, self.subject, self.visit, self.form, self.field
        )
    }
}

/// Trims and collapses internal whitespace runs to a single space.
pub fn normalize_component(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unicode lowercase of `raw`, the case-insensitive form of key components.
pub fn fold_case(raw: &str) -> String {
    raw.chars().flat_map(char::to_lowercase).collect()
}

/// Orders two strings by their [`fold_case`] forms without allocating.
pub fn cmp_folded(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

pub fn eq_folded(a: &str, b: &str) -> bool {
    cmp_folded(a, b) == Ordering::Equal
}

fn non_blank(raw: &str, column: &'static str) -> Result<String, &'static str> {
    let normalized = normalize_component(raw);
    if normalized.is_empty() {
        Err(column)
    } else {
        Ok(normalized)
    }
}
