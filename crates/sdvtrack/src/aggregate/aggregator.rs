//! Fresh-per-query rollups backed by the record repository.

use rusqlite::Connection;

use crate::aggregate::rollup::{Rollup, RollupRow, Summary};
use crate::aggregate::scope::{borrow_conditions, Filters, Level, Scope};
use crate::db::record_repo::Condition;
use crate::db::{record_repo, settings_repo, Database, DatabaseError};
use crate::model::CalculationSettings;

/// Anything that can produce per-child rollups for a scope.
///
/// The hierarchy cache is written against this trait rather than the
/// concrete [`Aggregator`].
pub trait RollupSource: Send + Sync {
    /// One row per distinct `level` value among the records in `scope`,
    /// ordered by value.
    fn children(
        &self,
        company_id: &str,
        scope: &Scope,
        level: Level,
    ) -> Result<Vec<RollupRow>, DatabaseError>;
}

/// Computes rollups over a company's canonical records. Nothing is cached.
#[derive(Clone)]
pub struct Aggregator {
    db: Database,
    defaults: CalculationSettings,
}

impl Aggregator {
    pub fn new(db: Database, defaults: CalculationSettings) -> Self {
        Self { db, defaults }
    }

    /// The company's saved settings, or the configured defaults.
    pub fn settings(&self, company_id: &str) -> Result<CalculationSettings, DatabaseError> {
        self.db
            .with_conn(|conn| settings_repo::get_or(conn, company_id, self.defaults))
    }

    /// Rollups of the records in `scope`, grouped by `level`.
    pub fn rollup(
        &self,
        company_id: &str,
        scope: &Scope,
        level: Level,
    ) -> Result<Vec<RollupRow>, DatabaseError> {
        let owned = scope.conditions();
        let conditions = borrow_conditions(&owned);
        self.db.with_conn(|conn| {
            let settings = settings_repo::get_or(conn, company_id, self.defaults)?;
            let groups =
                record_repo::group_counts(conn, company_id, &conditions, Some(level.column()))?;
            Ok(groups
                .into_iter()
                .map(|g| RollupRow {
                    value: g.value.unwrap_or_default(),
                    rollup: Rollup::from_counts(g.expected, g.entered, g.verified, &settings),
                })
                .collect())
        })
    }

    /// Ungrouped rollup of the records in `scope`.
    pub fn total(&self, company_id: &str, scope: &Scope) -> Result<Rollup, DatabaseError> {
        let owned = scope.conditions();
        let conditions = borrow_conditions(&owned);
        self.db
            .with_conn(|conn| self.total_in(conn, company_id, &conditions))
    }

    /// Top-level summary of the company's records under `filters`.
    ///
    /// Counts and totals are read under one connection lock.
    pub fn summary(&self, company_id: &str, filters: &Filters) -> Result<Summary, DatabaseError> {
        let owned = Scope::filtered(filters.clone()).conditions();
        let conditions = borrow_conditions(&owned);

        self.db.with_conn(|conn| {
            let site_count = record_repo::distinct_count(
                conn,
                company_id,
                &conditions,
                &[Level::Site.column()],
            )?;
            let subject_count = record_repo::distinct_count(
                conn,
                company_id,
                &conditions,
                &[Level::Site.column(), Level::Subject.column()],
            )?;
            Ok(Summary {
                site_count,
                subject_count,
                rollup: self.total_in(conn, company_id, &conditions)?,
            })
        })
    }

    fn total_in(
        &self,
        conn: &Connection,
        company_id: &str,
        conditions: &[Condition<'_>],
    ) -> Result<Rollup, DatabaseError> {
        let settings = settings_repo::get_or(conn, company_id, self.defaults)?;
        let totals = record_repo::group_counts(conn, company_id, conditions, None)?;
        let total = totals.into_iter().next().unwrap_or_default();
        Ok(Rollup::from_counts(
            total.expected,
            total.entered,
            total.verified,
            &settings,
        ))
    }
}

impl RollupSource for Aggregator {
    fn children(
        &self,
        company_id: &str,
        scope: &Scope,
        level: Level,
    ) -> Result<Vec<RollupRow>, DatabaseError> {
        self.rollup(company_id, scope, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::scope::NodePath;
    use crate::db::upload_repo;
    use crate::db::upload_repo::tests::sample_upload;
    use crate::model::{CompositeKey, ExtraAttributes, FileRole, PrimaryRow, VerificationRow};

    type SeedRow = (
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
        &'static str,
    );

    fn seed(db: &Database, rows: &[SeedRow], verified: &[usize]) {
        db.with_conn(|conn| {
            upload_repo::insert(conn, &sample_upload("p1", FileRole::Primary))?;
            for (i, (site, subject, visit, form, field, value)) in rows.iter().enumerate() {
                let key = CompositeKey::from_raw(site, subject, visit, form, field).unwrap();
                record_repo::upsert_primary(
                    conn,
                    "acme",
                    "p1",
                    "j1",
                    &PrimaryRow {
                        row_number: i as u64 + 1,
                        key: key.clone(),
                        value: value.to_string(),
                        entered_by: None,
                        entered_date: None,
                        extra: ExtraAttributes::new(),
                    },
                )?;
                if verified.contains(&i) {
                    record_repo::attach_verification(
                        conn,
                        "acme",
                        "v1",
                        &VerificationRow {
                            row_number: 1,
                            key,
                            verified_by: Some("mon".to_string()),
                            verified_date: None,
                            verification_status: None,
                            extra: ExtraAttributes::new(),
                        },
                    )?;
                }
            }
            Ok(())
        })
        .unwrap();
    }

    fn sample_rows() -> Vec<SeedRow> {
        vec![
            ("Site A", "001", "Visit 1", "Vitals", "HEIGHT", "172"),
            ("Site A", "001", "Visit 1", "Vitals", "WEIGHT", "70"),
            ("Site A", "001", "Visit 2", "Vitals", "HEIGHT", ""),
            ("Site A", "002", "Visit 1", "ECG", "QTC", "410"),
            ("Site B", "101", "Visit 1", "Vitals", "HEIGHT", "180"),
        ]
    }

    #[test]
    fn test_summary() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &sample_rows(), &[0, 4]);
        let aggregator = Aggregator::new(db, CalculationSettings::default());

        let summary = aggregator.summary("acme", &Filters::none()).unwrap();
        assert_eq!(summary.site_count, 2);
        assert_eq!(summary.subject_count, 3);
        assert_eq!(summary.rollup.data_expected, 5);
        assert_eq!(summary.rollup.data_entered, 4);
        assert_eq!(summary.rollup.data_verified, 2);
        assert_eq!(summary.rollup.sdv_percent, 40);

        let filtered = aggregator
            .summary("acme", &Filters::none().site("site b"))
            .unwrap();
        assert_eq!(filtered.site_count, 1);
        assert_eq!(filtered.rollup.sdv_percent, 100);
    }

    #[test]
    fn test_summary_counts_agree_while_records_are_written() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[], &[]);
        let aggregator = Aggregator::new(db.clone(), CalculationSettings::default());

        // Every write adds a site holding exactly one subject and one record.
        let writer = std::thread::spawn(move || {
            for i in 0..200u64 {
                let site = format!("Site {}", i);
                let key = CompositeKey::from_raw(&site, "001", "V1", "Vitals", "HEIGHT").unwrap();
                db.with_conn(|conn| {
                    record_repo::upsert_primary(
                        conn,
                        "acme",
                        "p1",
                        "j1",
                        &PrimaryRow {
                            row_number: i + 1,
                            key,
                            value: "1".to_string(),
                            entered_by: None,
                            entered_date: None,
                            extra: ExtraAttributes::new(),
                        },
                    )
                })
                .unwrap();
            }
        });

        while !writer.is_finished() {
            let summary = aggregator.summary("acme", &Filters::none()).unwrap();
            assert_eq!(summary.site_count, summary.rollup.data_expected);
            assert_eq!(summary.subject_count, summary.rollup.data_expected);
        }
        writer.join().unwrap();
        assert_eq!(aggregator.summary("acme", &Filters::none()).unwrap().site_count, 200);
    }

    #[test]
    fn test_unknown_company_is_vacuously_complete() {
        let db = Database::open_in_memory().unwrap();
        let aggregator = Aggregator::new(db, CalculationSettings::default());
        let summary = aggregator.summary("nobody", &Filters::none()).unwrap();
        assert_eq!(summary.site_count, 0);
        assert_eq!(summary.rollup.data_expected, 0);
        assert_eq!(summary.rollup.sdv_percent, 100);
        assert!(aggregator
            .rollup("nobody", &Scope::default(), Level::Site)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_children_sum_to_parent_at_every_level() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &sample_rows(), &[1, 3]);
        let aggregator = Aggregator::new(db, CalculationSettings::default());

        for filters in [
            Filters::none(),
            Filters::none().form("Vitals"),
            Filters::none().visit("Visit 1"),
        ] {
            let mut frontier = vec![NodePath::root()];
            while let Some(path) = frontier.pop() {
                let Some(level) = path.child_level() else {
                    continue;
                };
                let scope = Scope::new(path.clone(), filters.clone());
                let parent = aggregator.total("acme", &scope).unwrap();
                let children = aggregator.rollup("acme", &scope, level).unwrap();

                let expected: u64 = children.iter().map(|c| c.rollup.data_expected).sum();
                let verified: u64 = children.iter().map(|c| c.rollup.data_verified).sum();
                assert_eq!(expected, parent.data_expected, "at {} under {:?}", path, filters);
                assert_eq!(verified, parent.data_verified, "at {} under {:?}", path, filters);

                frontier.extend(children.iter().map(|c| path.child(&c.value)));
            }
        }
    }

    #[test]
    fn test_rollup_uses_saved_settings() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &sample_rows()[..3], &[0, 1]);
        db.with_conn(|conn| {
            settings_repo::save(conn, "acme", &CalculationSettings::new(60.0, 7.0).unwrap())
        })
        .unwrap();
        let aggregator = Aggregator::new(db, CalculationSettings::default());

        let visits = aggregator
            .rollup(
                "acme",
                &Scope::new(NodePath::from_values(["Site A", "001"]), Filters::none()),
                Level::Visit,
            )
            .unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].value, "Visit 1");
        assert_eq!(visits[0].rollup.sdv_percent, 100);
        assert_eq!(visits[1].rollup.data_needing_review, 1);
        assert_eq!(visits[1].rollup.estimate_hours, 1.0);
    }
}
