//! Required column sets and header normalization.

use super::job::FileRole;

/// The five columns that together form the composite key, in hierarchy order.
pub const KEY_COLUMNS: [&str; 5] = ["site", "subject", "visit", "form", "field"];

/// Required (normalized) header names of a primary extract.
pub const PRIMARY_REQUIRED: [&str; 8] = [
    "site",
    "subject",
    "visit",
    "form",
    "field",
    "value",
    "entered_by",
    "entered_date",
];

/// Required (normalized) header names of a verification extract.
pub const VERIFICATION_REQUIRED: [&str; 8] = [
    "site",
    "subject",
    "visit",
    "form",
    "field",
    "verified_by",
    "verified_date",
    "verification_status",
];

/// Upper bound on the number of non-required columns carried per row.
pub const MAX_EXTRA_ATTRIBUTES: usize = 32;

/// Upper bound on the length of a single extra attribute value, in chars.
pub const MAX_EXTRA_VALUE_CHARS: usize = 1024;

/// Returns the required column set for a file role.
pub fn required_columns(role: FileRole) -> &'static [&'static str; 8] {
    match role {
        FileRole::Primary => &PRIMARY_REQUIRED,
        FileRole::Verification => &VERIFICATION_REQUIRED,
    }
}

/// Normalizes a header cell for order-independent matching.
///
/// Strips a UTF-8 BOM, lowercases, and collapses every run of
/// non-alphanumeric characters into a single `_` (trimmed at both ends), so
/// `"Entered By"`, `"entered-by"` and `" ENTERED_BY "` all become
/// `entered_by`.
pub fn normalize_header(raw: &str) -> String {
    let raw = raw.trim_start_matches('\u{feff}');
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

/// Returns the required columns absent from `headers` (already normalized),
/// in the canonical order of the role's column set.
pub fn missing_columns(role: FileRole, headers: &[String]) -> Vec<String> {
    required_columns(role)
        .iter()
        .filter(|required| !headers.iter().any(|h| h == *required))
        .map(|s| s.to_string())
        .collect()
}
