//! Chunk-level merge of primary and verification rows.
//!
//! Every function here runs on the connection of the chunk's transaction;
//! the caller decides whether the work commits.

use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;

use super::consolidation::Consolidator;
use crate::config::ConsolidationRule;
use crate::db::{record_repo, upload_repo, DatabaseError};
use crate::error::ConfigError;
use crate::model::{ChunkRows, CompositeKey, FileRole, MatchKey, PrimaryRow, VerificationRow};

/// Identifies what a merge writes on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub company_id: &'a str,
    pub upload_id: &'a str,
    pub job_id: &'a str,
    /// The primary upload a verification upload is paired with.
    pub paired_upload_id: Option<&'a str>,
}

/// Two rows of one chunk sharing a composite key with different contents.
/// Resolved by keeping the later row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub key: CompositeKey,
    pub discarded_row: u64,
    pub kept_row: u64,
}

/// What merging one chunk did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Primary rows upserted.
    pub upserted: u64,
    /// Verification rows attached to a record.
    pub attached: u64,
    /// Verification rows with no matching record.
    pub orphans: u64,
    pub conflicts: Vec<MergeConflict>,
    /// Records whose source value consolidation re-derived.
    pub consolidated: u64,
}

/// Keeps the last row per key, in order of first appearance, and reports
/// the rows it dropped.
fn last_row_wins<'r, R>(
    rows: &'r [R],
    key_of: impl Fn(&R) -> &CompositeKey,
    row_of: impl Fn(&R) -> u64,
    differs: impl Fn(&R, &R) -> bool,
) -> (Vec<&'r R>, Vec<MergeConflict>) {
    let mut slots: Vec<&R> = Vec::with_capacity(rows.len());
    let mut index: HashMap<MatchKey, usize> = HashMap::with_capacity(rows.len());
    let mut conflicts = Vec::new();

    for row in rows {
        match index.get(&key_of(row).match_key()) {
            Some(&slot) => {
                let previous = slots[slot];
                if differs(previous, row) {
                    conflicts.push(MergeConflict {
                        key: key_of(row).clone(),
                        discarded_row: row_of(previous),
                        kept_row: row_of(row),
                    });
                }
                slots[slot] = row;
            }
            None => {
                index.insert(key_of(row).match_key(), slots.len());
                slots.push(row);
            }
        }
    }

    (slots, conflicts)
}

fn primary_differs(a: &PrimaryRow, b: &PrimaryRow) -> bool {
    a.value != b.value || a.entered_by != b.entered_by || a.entered_date != b.entered_date
}

pub struct MergeEngine {
    consolidator: Consolidator,
}

impl MergeEngine {
    pub fn new(rules: &[ConsolidationRule]) -> Result<Self, ConfigError> {
        Ok(Self {
            consolidator: Consolidator::new(rules)?,
        })
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    /// Merges one parsed chunk.
    pub fn merge_chunk(
        &self,
        conn: &Connection,
        ctx: &MergeContext<'_>,
        rows: &ChunkRows,
    ) -> Result<ChunkOutcome, DatabaseError> {
        let outcome = match rows {
            ChunkRows::Primary(rows) => self.merge_primary(conn, ctx, rows)?,
            ChunkRows::Verification(rows) => self.merge_verification(conn, ctx, rows)?,
        };

        for conflict in &outcome.conflicts {
            log::warn!(
                "Duplicate key {} in job {}: row {} replaces row {}",
                conflict.key,
                ctx.job_id,
                conflict.kept_row,
                conflict.discarded_row
            );
        }
        Ok(outcome)
    }

    fn merge_primary(
        &self,
        conn: &Connection,
        ctx: &MergeContext<'_>,
        rows: &[PrimaryRow],
    ) -> Result<ChunkOutcome, DatabaseError> {
        let (rows, conflicts) =
            last_row_wins(rows, |r| &r.key, |r| r.row_number, primary_differs);

        let mut subjects = BTreeMap::new();
        for row in &rows {
            record_repo::upsert_primary(conn, ctx.company_id, ctx.upload_id, ctx.job_id, row)?;
            subjects
                .entry(row.key.subject_key())
                .or_insert_with(|| (row.key.site.clone(), row.key.subject.clone()));
        }

        let consolidated = self
            .consolidator
            .apply(conn, ctx.company_id, ctx.job_id, &subjects)?;

        Ok(ChunkOutcome {
            upserted: rows.len() as u64,
            conflicts,
            consolidated,
            ..Default::default()
        })
    }

    fn merge_verification(
        &self,
        conn: &Connection,
        ctx: &MergeContext<'_>,
        rows: &[VerificationRow],
    ) -> Result<ChunkOutcome, DatabaseError> {
        let (rows, conflicts) = last_row_wins(
            rows,
            |r| &r.key,
            |r| r.row_number,
            VerificationRow::conflicts_with,
        );

        let mut outcome = ChunkOutcome {
            conflicts,
            ..Default::default()
        };
        for row in rows {
            if record_repo::attach_verification(conn, ctx.company_id, ctx.upload_id, row)? {
                outcome.attached += 1;
            } else {
                log::info!(
                    "Orphan verification row {} ({}) in job {}",
                    row.row_number,
                    row.key,
                    ctx.job_id
                );
                outcome.orphans += 1;
            }
        }
        Ok(outcome)
    }

    /// Work done once every chunk of a job has committed.
    ///
    /// A primary job prunes records it never saw, so the canonical set
    /// matches the latest primary file. A verification job becomes the
    /// active pairing of its primary upload. Returns the number of records
    /// pruned.
    pub fn finalize(
        &self,
        conn: &Connection,
        ctx: &MergeContext<'_>,
        role: FileRole,
    ) -> Result<usize, DatabaseError> {
        match role {
            FileRole::Primary => {
                let pruned = record_repo::prune_unseen(conn, ctx.company_id, ctx.job_id)?;
                if pruned > 0 {
                    log::info!(
                        "Pruned {} records absent from primary upload {}",
                        pruned,
                        ctx.upload_id
                    );
                }
                Ok(pruned)
            }
            FileRole::Verification => {
                if let Some(primary_id) = ctx.paired_upload_id {
                    upload_repo::set_pairing(conn, primary_id, ctx.upload_id)?;
                }
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::upload_repo::tests::sample_upload;
    use crate::db::Database;
    use crate::model::ExtraAttributes;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upload_repo::insert(conn, &sample_upload("p1", FileRole::Primary))?;
            let mut verification = sample_upload("v1", FileRole::Verification);
            verification.paired_upload_id = Some("p1".to_string());
            upload_repo::insert(conn, &verification)
        })
        .unwrap();
        db
    }

    fn ctx<'a>(upload_id: &'a str, job_id: &'a str) -> MergeContext<'a> {
        MergeContext {
            company_id: "acme",
            upload_id,
            job_id,
            paired_upload_id: (upload_id == "v1").then_some("p1"),
        }
    }

    fn primary(row: u64, subject: &str, field: &str, value: &str) -> PrimaryRow {
        PrimaryRow {
            row_number: row,
            key: CompositeKey::from_raw("Site A", subject, "Visit 1", "AE", field).unwrap(),
            value: value.to_string(),
            entered_by: None,
            entered_date: None,
            extra: ExtraAttributes::new(),
        }
    }

    fn verification(row: u64, field: &str, by: &str) -> VerificationRow {
        VerificationRow {
            row_number: row,
            key: CompositeKey::from_raw("site a", "001", "visit 1", "ae", field).unwrap(),
            verified_by: Some(by.to_string()),
            verified_date: None,
            verification_status: None,
            extra: ExtraAttributes::new(),
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(&[ConsolidationRule {
            name: "ae_term".to_string(),
            field_pattern: r"^AE_TERM_(\d+)$".to_string(),
            form: None,
        }])
        .unwrap()
    }

    fn source_value(db: &Database, field: &str) -> String {
        let key = CompositeKey::from_raw("Site A", "001", "Visit 1", "AE", field).unwrap();
        db.with_conn(|conn| record_repo::find(conn, "acme", &key))
            .unwrap()
            .unwrap()
            .source_value
    }

    #[test]
    fn test_duplicate_primary_keys_keep_last_row() {
        let db = setup();
        let rows = ChunkRows::Primary(vec![
            primary(1, "001", "HEIGHT", "170"),
            primary(2, "001", "height", "172"),
            primary(3, "001", "HEIGHT", "172"),
        ]);
        let outcome = db
            .with_conn(|conn| engine().merge_chunk(conn, &ctx("p1", "j1"), &rows))
            .unwrap();

        assert_eq!(outcome.upserted, 1);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].discarded_row, 1);
        assert_eq!(outcome.conflicts[0].kept_row, 2);
        assert_eq!(source_value(&db, "HEIGHT"), "172");
    }

    #[test]
    fn test_verification_matches_orphans_and_conflicts() {
        let db = setup();
        let engine = engine();
        db.with_conn(|conn| {
            engine.merge_chunk(
                conn,
                &ctx("p1", "j1"),
                &ChunkRows::Primary(vec![
                    primary(1, "001", "HEIGHT", "170"),
                    primary(2, "001", "WEIGHT", "70"),
                ]),
            )
        })
        .unwrap();

        let outcome = db
            .with_conn(|conn| {
                engine.merge_chunk(
                    conn,
                    &ctx("v1", "j2"),
                    &ChunkRows::Verification(vec![
                        verification(1, "HEIGHT", "mon1"),
                        verification(2, "PULSE", "mon1"),
                        verification(3, "HEIGHT", "mon2"),
                    ]),
                )
            })
            .unwrap();
        assert_eq!(outcome.attached, 1);
        assert_eq!(outcome.orphans, 1);
        assert_eq!(outcome.conflicts.len(), 1);

        let key = CompositeKey::from_raw("Site A", "001", "Visit 1", "AE", "HEIGHT").unwrap();
        let record = db
            .with_conn(|conn| record_repo::find(conn, "acme", &key))
            .unwrap()
            .unwrap();
        assert!(record.verified);
        assert_eq!(record.verified_by.as_deref(), Some("mon2"));
    }

    #[test]
    fn test_consolidation_is_independent_of_chunking() {
        let db = setup();
        let engine = engine();
        db.with_conn(|conn| {
            engine.merge_chunk(
                conn,
                &ctx("p1", "j1"),
                &ChunkRows::Primary(vec![primary(1, "001", "AE_TERM_1", "")]),
            )?;
            engine.merge_chunk(
                conn,
                &ctx("p1", "j1"),
                &ChunkRows::Primary(vec![
                    primary(2, "001", "AE_TERM_2", "Headache"),
                    primary(3, "001", "AE_TERM_3", "Nausea"),
                ]),
            )
        })
        .unwrap();

        assert_eq!(source_value(&db, "AE_TERM_1"), "Headache");
        assert_eq!(source_value(&db, "AE_TERM_2"), "Headache");
        assert_eq!(source_value(&db, "AE_TERM_3"), "Headache");
    }

    #[test]
    fn test_finalize_prunes_and_pairs() {
        let db = setup();
        let engine = engine();
        db.with_conn(|conn| {
            engine.merge_chunk(
                conn,
                &ctx("p1", "j1"),
                &ChunkRows::Primary(vec![
                    primary(1, "001", "HEIGHT", "170"),
                    primary(2, "002", "HEIGHT", "180"),
                ]),
            )?;
            engine.merge_chunk(
                conn,
                &ctx("p1", "j2"),
                &ChunkRows::Primary(vec![primary(1, "001", "HEIGHT", "171")]),
            )?;
            assert_eq!(engine.finalize(conn, &ctx("p1", "j2"), FileRole::Primary)?, 1);
            engine.finalize(conn, &ctx("v1", "j3"), FileRole::Verification)?;
            Ok(())
        })
        .unwrap();

        let primary = db
            .with_conn(|conn| upload_repo::find_by_id(conn, "p1"))
            .unwrap()
            .unwrap();
        assert_eq!(primary.paired_upload_id.as_deref(), Some("v1"));
        assert_eq!(source_value(&db, "HEIGHT"), "171");
    }
}
