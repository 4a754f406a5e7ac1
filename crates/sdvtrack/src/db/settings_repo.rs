//! Per-company calculation settings.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, DatabaseError};
use crate::model::CalculationSettings;

/// Returns the saved settings of a company, if any.
pub fn find(
    conn: &Connection,
    company_id: &str,
) -> Result<Option<CalculationSettings>, DatabaseError> {
    let settings = conn
        .query_row(
            "SELECT minutes_per_field, hours_per_day FROM calculation_settings
             WHERE company_id = ?1",
            params![company_id],
            |r| {
                Ok(CalculationSettings {
                    minutes_per_field: r.get(0)?,
                    hours_per_day: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(settings)
}

/// Returns the saved settings of a company, or `fallback` when none exist.
pub fn get_or(
    conn: &Connection,
    company_id: &str,
    fallback: CalculationSettings,
) -> Result<CalculationSettings, DatabaseError> {
    Ok(find(conn, company_id)?.unwrap_or(fallback))
}

/// Inserts or replaces the settings of a company. Callers validate first.
pub fn save(
    conn: &Connection,
    company_id: &str,
    settings: &CalculationSettings,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO calculation_settings (company_id, minutes_per_field, hours_per_day, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(company_id) DO UPDATE SET
             minutes_per_field = excluded.minutes_per_field,
             hours_per_day = excluded.hours_per_day,
             updated_at = excluded.updated_at",
        params![
            company_id,
            settings.minutes_per_field,
            settings.hours_per_day,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_missing_settings_fall_back() {
        let db = Database::open_in_memory().unwrap();
        let settings = db
            .with_conn(|conn| get_or(conn, "acme", CalculationSettings::default()))
            .unwrap();
        assert_eq!(settings, CalculationSettings::default());
        assert!(db.with_conn(|conn| find(conn, "acme")).unwrap().is_none());
    }

    #[test]
    fn test_save_and_overwrite() {
        let db = Database::open_in_memory().unwrap();
        let first = CalculationSettings::new(60.0, 7.0).unwrap();
        let second = CalculationSettings::new(2.5, 6.0).unwrap();

        db.with_conn(|conn| save(conn, "acme", &first)).unwrap();
        assert_eq!(db.with_conn(|conn| find(conn, "acme")).unwrap(), Some(first));

        db.with_conn(|conn| save(conn, "acme", &second)).unwrap();
        assert_eq!(db.with_conn(|conn| find(conn, "acme")).unwrap(), Some(second));
        assert!(db.with_conn(|conn| find(conn, "other")).unwrap().is_none());
    }
}
