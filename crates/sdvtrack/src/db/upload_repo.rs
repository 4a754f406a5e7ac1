//! Upload repository: batch headers of submitted files.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::model::{FileRole, MergeStatus, Upload};

/// A raw upload row from the database.
#[derive(Debug, Clone)]
struct UploadRow {
    id: String,
    company_id: String,
    file_role: String,
    file_name: String,
    blob_ref: String,
    row_count: i64,
    column_count: i64,
    merge_status: String,
    paired_upload_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl UploadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            file_role: row.get("file_role")?,
            file_name: row.get("file_name")?,
            blob_ref: row.get("blob_ref")?,
            row_count: row.get("row_count")?,
            column_count: row.get("column_count")?,
            merge_status: row.get("merge_status")?,
            paired_upload_id: row.get("paired_upload_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_upload(self) -> Result<Upload, DatabaseError> {
        let file_role = FileRole::parse(&self.file_role).ok_or(DatabaseError::Decode {
            table: "uploads",
            column: "file_role",
            value: self.file_role.clone(),
        })?;
        let merge_status =
            MergeStatus::parse(&self.merge_status).ok_or(DatabaseError::Decode {
                table: "uploads",
                column: "merge_status",
                value: self.merge_status.clone(),
            })?;

        Ok(Upload {
            id: self.id,
            company_id: self.company_id,
            file_role,
            file_name: self.file_name,
            blob_ref: self.blob_ref,
            row_count: self.row_count.max(0) as u64,
            column_count: self.column_count.max(0) as u32,
            merge_status,
            paired_upload_id: self.paired_upload_id,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

pub fn insert(conn: &Connection, upload: &Upload) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO uploads (id, company_id, file_role, file_name, blob_ref, row_count,
         column_count, merge_status, paired_upload_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            upload.id,
            upload.company_id,
            upload.file_role.as_str(),
            upload.file_name,
            upload.blob_ref,
            upload.row_count as i64,
            upload.column_count,
            upload.merge_status.as_str(),
            upload.paired_upload_id,
            format_timestamp(upload.created_at),
            format_timestamp(upload.updated_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Upload>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM uploads WHERE id = ?1",
        params![id],
        UploadRow::from_row,
    )
    .optional()?
    .map(UploadRow::into_upload)
    .transpose()
}

/// Uploads of a company, newest first.
pub fn list_for_company(
    conn: &Connection,
    company_id: &str,
) -> Result<Vec<Upload>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM uploads WHERE company_id = ?1 ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map(params![company_id], UploadRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(UploadRow::into_upload).collect()
}

pub fn set_merge_status(
    conn: &Connection,
    id: &str,
    status: MergeStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploads SET merge_status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), format_timestamp(Utc::now())],
    )?;
    Ok(())
}

/// Points `primary_id` at its active verification upload.
pub fn set_pairing(
    conn: &Connection,
    primary_id: &str,
    verification_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploads SET paired_upload_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![primary_id, verification_id, format_timestamp(Utc::now())],
    )?;
    Ok(())
}

/// Clears every pairing link that points at `upload_id`.
pub fn clear_pairings_to(conn: &Connection, upload_id: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE uploads SET paired_upload_id = NULL, updated_at = ?2 WHERE paired_upload_id = ?1",
        params![upload_id, format_timestamp(Utc::now())],
    )?;
    Ok(changed)
}

/// Deletes an upload row. Records owned by a primary upload go with it.
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM uploads WHERE id = ?1", params![id])?;
    Ok(changed == 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Database;

    pub(crate) fn sample_upload(id: &str, role: FileRole) -> Upload {
        let now = Utc::now();
        Upload {
            id: id.to_string(),
            company_id: "acme".to_string(),
            file_role: role,
            file_name: format!("{}.csv", id),
            blob_ref: format!("acme/{}", id),
            row_count: 3,
            column_count: 8,
            merge_status: MergeStatus::Pending,
            paired_upload_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn find(db: &Database, id: &str) -> Option<Upload> {
        db.with_conn(|conn| find_by_id(conn, id)).unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| insert(conn, &sample_upload("u1", FileRole::Verification)))
            .unwrap();

        let found = find(&db, "u1").unwrap();
        assert_eq!(found.file_role, FileRole::Verification);
        assert_eq!(found.merge_status, MergeStatus::Pending);
        assert_eq!(found.row_count, 3);
        assert!(find(&db, "missing").is_none());
    }

    #[test]
    fn test_merge_status_and_pairing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(conn, &sample_upload("p1", FileRole::Primary))?;
            let mut verification = sample_upload("v1", FileRole::Verification);
            verification.paired_upload_id = Some("p1".to_string());
            insert(conn, &verification)?;
            set_merge_status(conn, "p1", MergeStatus::Merged)?;
            set_pairing(conn, "p1", "v1")
        })
        .unwrap();

        let primary = find(&db, "p1").unwrap();
        assert_eq!(primary.merge_status, MergeStatus::Merged);
        assert_eq!(primary.paired_upload_id.as_deref(), Some("v1"));

        let cleared = db.with_conn(|conn| clear_pairings_to(conn, "v1")).unwrap();
        assert_eq!(cleared, 1);
        assert!(find(&db, "p1").unwrap().paired_upload_id.is_none());
    }

    #[test]
    fn test_list_and_delete() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(conn, &sample_upload("a", FileRole::Primary))?;
            insert(conn, &sample_upload("b", FileRole::Primary))
        })
        .unwrap();

        assert_eq!(db.with_conn(|conn| list_for_company(conn, "acme")).unwrap().len(), 2);
        assert!(db.with_conn(|conn| delete(conn, "a")).unwrap());
        assert!(!db.with_conn(|conn| delete(conn, "a")).unwrap());
        assert_eq!(db.with_conn(|conn| list_for_company(conn, "acme")).unwrap().len(), 1);
    }
}
