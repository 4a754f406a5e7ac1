//! Versioned schema files, applied in order and recorded in `_migrations`.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_uploads_table",
        sql: include_str!("sql/001_create_uploads.sql"),
    },
    Migration {
        version: 2,
        description: "create_upload_jobs_table",
        sql: include_str!("sql/002_create_upload_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_verification_records_table",
        sql: include_str!("sql/003_create_verification_records.sql"),
    },
    Migration {
        version: 4,
        description: "create_calculation_settings_table",
        sql: include_str!("sql/004_create_calculation_settings.sql"),
    },
];

/// Highest applied migration version, 0 on a fresh database.
fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Applies every migration newer than the database, each in its own
/// transaction together with its `_migrations` row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = applied_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::register_collations;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get::<_, u32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        register_collations(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);

        for table in [
            "uploads",
            "upload_jobs",
            "verification_records",
            "calculation_settings",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        register_collations(&conn).unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_record_keys_are_case_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        register_collations(&conn).unwrap();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO uploads (id, company_id, file_role, file_name, blob_ref, created_at, updated_at)
             VALUES ('u1', 'acme', 'primary', 'p.csv', 'uploads/u1', 'now', 'now');
             INSERT INTO verification_records
                (company_id, site, subject, visit, form, field, primary_upload_id, last_seen_job, updated_at)
             VALUES ('acme', 'Site A', '001', 'Visit 1', 'Vitals', 'HEIGHT', 'u1', 'j1', 'now');",
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO verification_records
                (company_id, site, subject, visit, form, field, primary_upload_id, last_seen_job, updated_at)
             VALUES ('acme', 'SITE A', '001', 'visit 1', 'VITALS', 'height', 'u1', 'j1', 'now')",
            [],
        );
        assert!(duplicate.is_err());

        conn.execute(
            "INSERT INTO verification_records
                (company_id, site, subject, visit, form, field, primary_upload_id, last_seen_job, updated_at)
             VALUES ('acme', 'Zürich', 'Ödön', 'Visite 1', 'Études', 'ÂGE', 'u1', 'j1', 'now')",
            [],
        )
        .unwrap();
        let folded = conn.execute(
            "INSERT INTO verification_records
                (company_id, site, subject, visit, form, field, primary_upload_id, last_seen_job, updated_at)
             VALUES ('acme', 'ZÜRICH', 'ödön', 'VISITE 1', 'études', 'âge', 'u1', 'j1', 'now')",
            [],
        );
        assert!(folded.is_err());
        let matched: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM verification_records WHERE site = 'zürich'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(matched, 1);
    }
}
