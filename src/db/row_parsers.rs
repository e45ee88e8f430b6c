use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Assignment, EdgeMetadata, Permission, Relation, Role, User};

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn get_string(row: &SqliteRow, col: &str) -> Result<String, AppError> {
    row.try_get(col)
        .map_err(|e| AppError::internal(format!("missing {}: {}", col, e)))
}

fn get_opt_string(row: &SqliteRow, col: &str) -> Result<Option<String>, AppError> {
    row.try_get(col)
        .map_err(|e| AppError::internal(format!("missing {}: {}", col, e)))
}

pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn get_uuid(row: &SqliteRow, col: &str) -> Result<Uuid, AppError> {
    parse_uuid(&get_string(row, col)?)
}

fn get_opt_uuid(row: &SqliteRow, col: &str) -> Result<Option<Uuid>, AppError> {
    get_opt_string(row, col)?.as_deref().map(parse_uuid).transpose()
}

fn get_datetime(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, AppError> {
    parse_datetime(&get_string(row, col)?)
}

pub fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    Ok(User {
        id: get_uuid(row, "id")?,
        name: get_string(row, "name")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    Ok(Role {
        id: get_uuid(row, "id")?,
        name: get_string(row, "name")?,
        slug: get_string(row, "slug")?,
        description: get_opt_string(row, "description")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    Ok(Permission {
        id: get_uuid(row, "id")?,
        name: get_string(row, "name")?,
        slug: get_string(row, "slug")?,
        description: get_opt_string(row, "description")?,
        parent_id: get_opt_uuid(row, "parent_id")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

/// Expects the edge columns aliased to `subject_id` / `object_id`.
pub fn assignment_from_row(relation: Relation, row: &SqliteRow) -> Result<Assignment, AppError> {
    Ok(Assignment {
        id: get_uuid(row, "id")?,
        relation,
        subject_id: get_uuid(row, "subject_id")?,
        object_id: get_uuid(row, "object_id")?,
        metadata: EdgeMetadata {
            assigned_by: get_opt_uuid(row, "assigned_by")?,
            notes: get_opt_string(row, "notes")?,
        },
        created_at: get_datetime(row, "created_at")?,
    })
}

/// Collects a single-column id result.
pub fn ids_from_rows(rows: &[SqliteRow], col: &str) -> Result<Vec<Uuid>, AppError> {
    rows.iter().map(|row| get_uuid(row, col)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_datetime_accepts_rfc3339_and_sqlite_formats() {
        let rfc = parse_datetime("2025-11-19T12:34:56Z").unwrap();
        let sqlite = parse_datetime("2025-11-19 12:34:56").unwrap();
        assert_eq!(rfc, sqlite);
        assert!(parse_datetime("yesterday").is_err());
    }
}
