//! Job repository: persistence and conditional transitions for `upload_jobs`.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::ingest::ChunkPlan;
use crate::model::{FileRole, JobStatus, UploadJob};

/// Message stored on jobs found mid-flight at startup.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: the process stopped before the job finished";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    company_id: String,
    upload_id: String,
    file_role: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    skipped_records: i64,
    orphan_records: i64,
    conflict_records: i64,
    total_chunks: i64,
    current_chunk: i64,
    paired_upload_id: Option<String>,
    error_message: Option<String>,
    blob_ref: String,
    plan: String,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            upload_id: row.get("upload_id")?,
            file_role: row.get("file_role")?,
            status: row.get("status")?,
            total_records: row.get("total_records")?,
            processed_records: row.get("processed_records")?,
            skipped_records: row.get("skipped_records")?,
            orphan_records: row.get("orphan_records")?,
            conflict_records: row.get("conflict_records")?,
            total_chunks: row.get("total_chunks")?,
            current_chunk: row.get("current_chunk")?,
            paired_upload_id: row.get("paired_upload_id")?,
            error_message: row.get("error_message")?,
            blob_ref: row.get("blob_ref")?,
            plan: row.get("plan")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<UploadJob, DatabaseError> {
        let file_role = FileRole::parse(&self.file_role).ok_or(DatabaseError::Decode {
            table: "upload_jobs",
            column: "file_role",
            value: self.file_role.clone(),
        })?;
        let status = JobStatus::parse(&self.status).ok_or(DatabaseError::Decode {
            table: "upload_jobs",
            column: "status",
            value: self.status.clone(),
        })?;
        let plan: ChunkPlan = serde_json::from_str(&self.plan)?;

        Ok(UploadJob {
            id: self.id,
            company_id: self.company_id,
            upload_id: self.upload_id,
            file_role,
            status,
            total_records: self.total_records.max(0) as u64,
            processed_records: self.processed_records.max(0) as u64,
            skipped_records: self.skipped_records.max(0) as u64,
            orphan_records: self.orphan_records.max(0) as u64,
            conflict_records: self.conflict_records.max(0) as u64,
            total_chunks: self.total_chunks.max(0) as u32,
            current_chunk: self.current_chunk.max(0) as u32,
            paired_upload_id: self.paired_upload_id,
            error_message: self.error_message,
            blob_ref: self.blob_ref,
            plan,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            started_at: self.started_at.as_deref().map(parse_timestamp),
            completed_at: self.completed_at.as_deref().map(parse_timestamp),
        })
    }
}

/// Counter deltas committed together with one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkProgress {
    /// 0-based index of the committed chunk.
    pub chunk_index: u32,
    /// Rows consumed, skipped ones included.
    pub rows: u64,
    pub skipped: u64,
    pub orphans: u64,
    pub conflicts: u64,
}

fn is_active_pairing_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == ErrorCode::ConstraintViolation && msg.contains("pairing_key")
    )
}

/// Inserts a new job.
///
/// Returns `false` without inserting when another pending or processing job
/// already holds the same pairing, or when `job` verifies records of a
/// company whose primary job is still active.
pub fn insert(conn: &Connection, job: &UploadJob) -> Result<bool, DatabaseError> {
    if job.file_role == FileRole::Verification
        && find_active_primary(conn, &job.company_id)?.is_some()
    {
        return Ok(false);
    }

    let plan = serde_json::to_string(&job.plan)?;
    let result = conn.execute(
        "INSERT INTO upload_jobs (id, company_id, upload_id, file_role, status, total_records,
         processed_records, skipped_records, orphan_records, conflict_records, total_chunks,
         current_chunk, paired_upload_id, pairing_key, error_message, blob_ref, plan,
         created_at, updated_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21)",
        params![
            job.id,
            job.company_id,
            job.upload_id,
            job.file_role.as_str(),
            job.status.as_str(),
            job.total_records as i64,
            job.processed_records as i64,
            job.skipped_records as i64,
            job.orphan_records as i64,
            job.conflict_records as i64,
            job.total_chunks,
            job.current_chunk,
            job.paired_upload_id,
            job.pairing_key(),
            job.error_message,
            job.blob_ref,
            plan,
            format_timestamp(job.created_at),
            format_timestamp(job.updated_at),
            job.started_at.map(format_timestamp),
            job.completed_at.map(format_timestamp),
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_active_pairing_conflict(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<UploadJob>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM upload_jobs WHERE id = ?1",
        params![id],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_job)
    .transpose()
}

/// Finds the pending or processing job holding a pairing, if any.
pub fn find_active_for_pairing(
    conn: &Connection,
    pairing_key: &str,
) -> Result<Option<UploadJob>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM upload_jobs
         WHERE pairing_key = ?1 AND status IN ('pending', 'processing')",
        params![pairing_key],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_job)
    .transpose()
}

/// The pending or processing primary job of a company, if any.
pub fn find_active_primary(
    conn: &Connection,
    company_id: &str,
) -> Result<Option<UploadJob>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM upload_jobs
         WHERE company_id = ?1 AND file_role = 'primary'
           AND status IN ('pending', 'processing')",
        params![company_id],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_job)
    .transpose()
}

/// The active job that keeps a job with this role and pairing key from
/// being queued: [`insert`] refuses exactly while this returns `Some`.
pub fn find_blocking(
    conn: &Connection,
    company_id: &str,
    file_role: FileRole,
    pairing_key: &str,
) -> Result<Option<UploadJob>, DatabaseError> {
    if let Some(job) = find_active_for_pairing(conn, pairing_key)? {
        return Ok(Some(job));
    }
    match file_role {
        FileRole::Primary => Ok(None),
        FileRole::Verification => find_active_primary(conn, company_id),
    }
}

/// Pending or processing jobs that merge `upload_id` or are paired with it.
pub fn list_active_for_upload(
    conn: &Connection,
    upload_id: &str,
) -> Result<Vec<UploadJob>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM upload_jobs
         WHERE (upload_id = ?1 OR paired_upload_id = ?1)
           AND status IN ('pending', 'processing')
         ORDER BY created_at",
        params![upload_id],
    )
}

/// Jobs with the given status, oldest first.
pub fn list_by_status(
    conn: &Connection,
    status: JobStatus,
) -> Result<Vec<UploadJob>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM upload_jobs WHERE status = ?1 ORDER BY created_at",
        params![status.as_str()],
    )
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<UploadJob>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<JobRow> = stmt
        .query_map(params, JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Moves a job to `to` if and only if its current status may legally
/// precede it. Returns whether the transition happened.
///
/// `error_message` is stored when given. Entering `processing` stamps
/// `started_at`; entering a terminal state stamps `completed_at`.
pub fn transition(
    conn: &Connection,
    id: &str,
    to: JobStatus,
    error_message: Option<&str>,
) -> Result<bool, DatabaseError> {
    let sources = JobStatus::sources_of(to);
    if sources.is_empty() {
        return Ok(false);
    }
    let in_list = sources
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let now = format_timestamp(Utc::now());
    let started_at = (to == JobStatus::Processing).then_some(now.as_str());
    let completed_at = to.is_terminal().then_some(now.as_str());

    let sql = format!(
        "UPDATE upload_jobs SET status = ?2, updated_at = ?3,
             error_message = COALESCE(?4, error_message),
             started_at = COALESCE(?5, started_at),
             completed_at = COALESCE(?6, completed_at)
         WHERE id = ?1 AND status IN ({})",
        in_list
    );
    let changed = conn.execute(
        &sql,
        params![id, to.as_str(), now, error_message, started_at, completed_at],
    )?;
    Ok(changed == 1)
}

/// Adds one committed chunk's counters to a processing job.
///
/// Returns `false` (and changes nothing) when the job is no longer
/// processing, in which case the surrounding transaction must not commit.
pub fn record_chunk(
    conn: &Connection,
    id: &str,
    progress: &ChunkProgress,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE upload_jobs SET
             processed_records = processed_records + ?2,
             skipped_records = skipped_records + ?3,
             orphan_records = orphan_records + ?4,
             conflict_records = conflict_records + ?5,
             current_chunk = ?6,
             updated_at = ?7
         WHERE id = ?1 AND status = 'processing'",
        params![
            id,
            progress.rows as i64,
            progress.skipped as i64,
            progress.orphans as i64,
            progress.conflicts as i64,
            progress.chunk_index + 1,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(changed == 1)
}

/// Fails every job left in `processing` by a previous process.
///
/// Returns the affected jobs as they were before the update.
pub fn fail_interrupted(conn: &Connection) -> Result<Vec<UploadJob>, DatabaseError> {
    let interrupted = list_by_status(conn, JobStatus::Processing)?;
    for job in &interrupted {
        transition(conn, &job.id, JobStatus::Failed, Some(INTERRUPTED_MESSAGE))?;
    }
    Ok(interrupted)
}
