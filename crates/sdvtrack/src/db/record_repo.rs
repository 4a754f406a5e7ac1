//! Canonical record repository: upserts, verification attachment and the
//! grouped counts the aggregation layer is built on.
//!
//! Key columns carry `COLLATE FOLD`, so every comparison and grouping on
//! them below is case-insensitive the way [`crate::model::fold_case`] is.

use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, DatabaseError};
use crate::model::{
    CompositeKey, ExtraAttributes, PrimaryRow, VerificationRecord, VerificationRow,
};

/// An equality condition on a key column. The column name must be one of
/// [`crate::model::KEY_COLUMNS`].
pub type Condition<'a> = (&'static str, &'a str);

/// One row of a consolidation scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub id: i64,
    pub visit: String,
    pub form: String,
    pub field: String,
    pub raw_value: String,
}

/// Counts of one group of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCounts {
    /// Value of the grouping column; `None` for an ungrouped total.
    pub value: Option<String>,
    pub expected: u64,
    pub entered: u64,
    pub verified: u64,
}

fn encode_extra(extra: &ExtraAttributes) -> Result<Option<String>, DatabaseError> {
    if extra.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(extra)?))
    }
}

/// Inserts or refreshes the record for a primary row.
///
/// Only primary-side columns are written; verification metadata already
/// attached to the key survives. `source_value` restarts from the raw value
/// and is re-derived by consolidation.
pub fn upsert_primary(
    conn: &Connection,
    company_id: &str,
    upload_id: &str,
    job_id: &str,
    row: &PrimaryRow,
) -> Result<(), DatabaseError> {
    let extra = encode_extra(&row.extra)?;
    conn.execute(
        "INSERT INTO verification_records (company_id, site, subject, visit, form, field,
         raw_value, source_value, entered_by, entered_date, extra, primary_upload_id,
         last_seen_job, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(company_id, site, subject, visit, form, field) DO UPDATE SET
             raw_value = excluded.raw_value,
             source_value = excluded.source_value,
             entered_by = excluded.entered_by,
             entered_date = excluded.entered_date,
             extra = excluded.extra,
             primary_upload_id = excluded.primary_upload_id,
             last_seen_job = excluded.last_seen_job,
             updated_at = excluded.updated_at",
        params![
            company_id,
            row.key.site,
            row.key.subject,
            row.key.visit,
            row.key.form,
            row.key.field,
            row.value,
            row.entered_by,
            row.entered_date,
            extra,
            upload_id,
            job_id,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Records of one subject written by `job_id`, in no particular order.
pub fn consolidation_candidates(
    conn: &Connection,
    company_id: &str,
    job_id: &str,
    site: &str,
    subject: &str,
) -> Result<Vec<CandidateRow>, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, visit, form, field, raw_value FROM verification_records
         WHERE company_id = ?1 AND site = ?2 AND subject = ?3 AND last_seen_job = ?4",
    )?;
    let rows = stmt
        .query_map(params![company_id, site, subject, job_id], |r| {
            Ok(CandidateRow {
                id: r.get(0)?,
                visit: r.get(1)?,
                form: r.get(2)?,
                field: r.get(3)?,
                raw_value: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_source_value(conn: &Connection, id: i64, value: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE verification_records SET source_value = ?2 WHERE id = ?1 AND source_value <> ?2",
        params![id, value],
    )?;
    Ok(())
}

/// Attaches verification metadata to the record with the row's key.
///
/// Returns `false` when no record has that key (an orphan).
pub fn attach_verification(
    conn: &Connection,
    company_id: &str,
    verification_upload_id: &str,
    row: &VerificationRow,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE verification_records SET
             verified = 1,
             verified_by = ?7,
             verified_date = ?8,
             verification_status = ?9,
             verification_upload_id = ?10,
             updated_at = ?11
         WHERE company_id = ?1 AND site = ?2 AND subject = ?3 AND visit = ?4
           AND form = ?5 AND field = ?6",
        params![
            company_id,
            row.key.site,
            row.key.subject,
            row.key.visit,
            row.key.form,
            row.key.field,
            row.verified_by,
            row.verified_date,
            row.verification_status,
            verification_upload_id,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(changed > 0)
}

/// Removes the verification metadata a verification upload attached.
pub fn detach_verification(
    conn: &Connection,
    verification_upload_id: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE verification_records SET
             verified = 0,
             verified_by = NULL,
             verified_date = NULL,
             verification_status = NULL,
             verification_upload_id = NULL,
             updated_at = ?2
         WHERE verification_upload_id = ?1",
        params![verification_upload_id, format_timestamp(Utc::now())],
    )?;
    Ok(changed)
}

/// Deletes the company's records that `job_id` did not see.
pub fn prune_unseen(
    conn: &Connection,
    company_id: &str,
    job_id: &str,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM verification_records WHERE company_id = ?1 AND last_seen_job <> ?2",
        params![company_id, job_id],
    )?;
    Ok(removed)
}

fn record_from_row(
    row: &Row<'_>,
) -> Result<(VerificationRecord, Option<String>), rusqlite::Error> {
    let verified: i64 = row.get("verified")?;
    let extra: Option<String> = row.get("extra")?;
    Ok((
        VerificationRecord {
            key: CompositeKey {
                site: row.get("site")?,
                subject: row.get("subject")?,
                visit: row.get("visit")?,
                form: row.get("form")?,
                field: row.get("field")?,
            },
            source_value: row.get("source_value")?,
            raw_value: row.get("raw_value")?,
            entered_by: row.get("entered_by")?,
            entered_date: row.get("entered_date")?,
            verified: verified != 0,
            verified_by: row.get("verified_by")?,
            verified_date: row.get("verified_date")?,
            verification_status: row.get("verification_status")?,
            extra: ExtraAttributes::new(),
            primary_upload_id: row.get("primary_upload_id")?,
            verification_upload_id: row.get("verification_upload_id")?,
        },
        extra,
    ))
}

fn decode_record(
    (mut record, extra): (VerificationRecord, Option<String>),
) -> Result<VerificationRecord, DatabaseError> {
    if let Some(json) = extra {
        record.extra = serde_json::from_str(&json)?;
    }
    Ok(record)
}

/// Finds the record with the given key.
pub fn find(
    conn: &Connection,
    company_id: &str,
    key: &CompositeKey,
) -> Result<Option<VerificationRecord>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM verification_records
         WHERE company_id = ?1 AND site = ?2 AND subject = ?3 AND visit = ?4
           AND form = ?5 AND field = ?6",
        params![company_id, key.site, key.subject, key.visit, key.form, key.field],
        record_from_row,
    )
    .optional()?
    .map(decode_record)
    .transpose()
}

/// Builds `company_id = ?1 AND col = ?n ...` plus its parameters.
fn where_clause(company_id: &str, conditions: &[Condition<'_>]) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses = vec!["company_id = ?1".to_string()];
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(company_id.to_string())];
    for (column, value) in conditions {
        clauses.push(format!("{} = ?{}", column, values.len() + 1));
        values.push(Box::new(value.to_string()));
    }
    (clauses.join(" AND "), values)
}

fn as_params(values: &[Box<dyn ToSql>]) -> Vec<&dyn ToSql> {
    values.iter().map(|p| p.as_ref()).collect()
}

/// Records matching the conditions, in hierarchy order.
pub fn list(
    conn: &Connection,
    company_id: &str,
    conditions: &[Condition<'_>],
    limit: u64,
    offset: u64,
) -> Result<Vec<VerificationRecord>, DatabaseError> {
    let (clause, mut values) = where_clause(company_id, conditions);
    values.push(Box::new(limit as i64));
    values.push(Box::new(offset as i64));
    let sql = format!(
        "SELECT * FROM verification_records WHERE {}
         ORDER BY site, subject, visit, form, field LIMIT ?{} OFFSET ?{}",
        clause,
        values.len() - 1,
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(&values).as_slice(), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_record).collect()
}

/// Counts records matching the conditions, grouped by `group_by` when
/// given. Groups are ordered by their value; without grouping a single
/// (possibly all-zero) total is returned.
pub fn group_counts(
    conn: &Connection,
    company_id: &str,
    conditions: &[Condition<'_>],
    group_by: Option<&'static str>,
) -> Result<Vec<GroupCounts>, DatabaseError> {
    let (clause, values) = where_clause(company_id, conditions);
    let counts = "COUNT(*),
             COALESCE(SUM(CASE WHEN TRIM(source_value) <> '' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(verified), 0)";
    let sql = match group_by {
        Some(column) => format!(
            "SELECT {column}, {counts} FROM verification_records WHERE {clause}
             GROUP BY {column} ORDER BY {column}"
        ),
        None => format!("SELECT NULL, {counts} FROM verification_records WHERE {clause}"),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(&values).as_slice(), |r| {
            let expected: i64 = r.get(1)?;
            let entered: i64 = r.get(2)?;
            let verified: i64 = r.get(3)?;
            Ok(GroupCounts {
                value: r.get(0)?,
                expected: expected.max(0) as u64,
                entered: entered.max(0) as u64,
                verified: verified.max(0) as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of distinct value combinations of `columns` among matching records.
pub fn distinct_count(
    conn: &Connection,
    company_id: &str,
    conditions: &[Condition<'_>],
    columns: &[&'static str],
) -> Result<u64, DatabaseError> {
    let (clause, values) = where_clause(company_id, conditions);
    let sql = format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM verification_records WHERE {} GROUP BY {})",
        clause,
        columns.join(", ")
    );
    let count: i64 = conn.query_row(&sql, as_params(&values).as_slice(), |r| r.get(0))?;
    Ok(count.max(0) as u64)
}
