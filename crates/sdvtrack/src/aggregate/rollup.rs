//! Rollup arithmetic.

use serde::Serialize;

use crate::model::CalculationSettings;

/// Aggregate figures of a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub data_expected: u64,
    pub data_entered: u64,
    pub data_verified: u64,
    pub data_needing_review: u64,
    pub sdv_percent: u32,
    pub estimate_hours: f64,
    pub estimate_days: f64,
}

impl Rollup {
    /// Derives the figures from raw counts.
    ///
    /// `sdv_percent` is 100 for an empty set.
    pub fn from_counts(
        expected: u64,
        entered: u64,
        verified: u64,
        settings: &CalculationSettings,
    ) -> Self {
        let verified = verified.min(expected);
        let needing_review = expected - verified;
        let sdv_percent = if expected == 0 {
            100
        } else {
            (100.0 * verified as f64 / expected as f64).round() as u32
        };
        let estimate_hours = needing_review as f64 * (settings.minutes_per_field / 60.0);
        let estimate_days = if settings.hours_per_day > 0.0 {
            estimate_hours / settings.hours_per_day
        } else {
            0.0
        };

        Self {
            data_expected: expected,
            data_entered: entered.min(expected),
            data_verified: verified,
            data_needing_review: needing_review,
            sdv_percent,
            estimate_hours,
            estimate_days,
        }
    }
}

/// Figures of one child group, labelled by its value at the grouped level.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupRow {
    pub value: String,
    #[serde(flatten)]
    pub rollup: Rollup,
}

/// Top-level summary of a filtered record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub site_count: u64,
    pub subject_count: u64,
    #[serde(flatten)]
    pub rollup: Rollup,
}
