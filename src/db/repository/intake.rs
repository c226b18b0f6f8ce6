use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::{from_millis, to_millis};
use crate::db::DatabaseError;
use crate::models::enums::IntakeStatus;
use crate::models::*;

const INTAKE_COLUMNS: &str = "id, owner_id, medication_name, medication_key, planned_at,
     actual_at, status, dosage, notes, created_at, updated_at";

/// Insert `record` unless a row with the same natural key exists.
/// Returns whether a row was written.
pub fn insert_intake_if_absent(conn: &Connection, record: &IntakeInstance) -> Result<bool, DatabaseError> {
    let owner = if is_unowned(Some(&record.owner_id)) {
        None
    } else {
        Some(record.owner_id.as_str())
    };
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO intake_records (id, owner_id, medication_name, medication_key,
         planned_at, actual_at, status, dosage, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.id.to_string(),
            owner,
            record.medication_name,
            record.medication_key,
            to_millis(record.planned_at),
            record.actual_at.map(to_millis),
            record.status.as_str(),
            record.dosage,
            record.notes,
            to_millis(record.created_at),
            to_millis(record.updated_at),
        ],
    )?;
    Ok(inserted == 1)
}

pub fn get_intake_by_key(conn: &Connection, key: &NaturalKey) -> Result<Option<IntakeInstance>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {INTAKE_COLUMNS} FROM intake_records
                 WHERE owner_id = ?1 AND medication_key = ?2 AND planned_at = ?3"
            ),
            params![key.owner_id.as_str(), key.medication_key, to_millis(key.planned_at)],
            intake_row_from_rusqlite,
        )
        .optional()?;
    row.map(intake_from_row).transpose()
}

/// PLANNED to TAKEN on the keyed row. Returns whether a row changed.
pub fn set_intake_taken(
    conn: &Connection,
    key: &NaturalKey,
    actual_at: DateTime<Utc>,
    dosage: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE intake_records
         SET status = 'taken', actual_at = ?4, dosage = COALESCE(?5, dosage), updated_at = ?6
         WHERE owner_id = ?1 AND medication_key = ?2 AND planned_at = ?3 AND status = 'planned'",
        params![
            key.owner_id.as_str(),
            key.medication_key,
            to_millis(key.planned_at),
            to_millis(actual_at),
            dosage,
            to_millis(now),
        ],
    )?;
    Ok(changed > 0)
}

/// TAKEN to PLANNED on the keyed row, clearing the actual instant.
pub fn set_intake_planned(conn: &Connection, key: &NaturalKey, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE intake_records
         SET status = 'planned', actual_at = NULL, updated_at = ?4
         WHERE owner_id = ?1 AND medication_key = ?2 AND planned_at = ?3 AND status = 'taken'",
        params![
            key.owner_id.as_str(),
            key.medication_key,
            to_millis(key.planned_at),
            to_millis(now),
        ],
    )?;
    Ok(changed > 0)
}

/// Overwrite the mutable fields of one row. Used by the sync merge.
pub fn overwrite_intake_state(conn: &Connection, record: &IntakeInstance) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE intake_records
         SET status = ?2, actual_at = ?3, dosage = ?4, notes = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.status.as_str(),
            record.actual_at.map(to_millis),
            record.dosage,
            record.notes,
            to_millis(record.updated_at),
        ],
    )?;
    Ok(())
}

/// Rows of `owner` planned in `[start, end)`, ascending by planned instant.
pub fn find_intakes_in_range(
    conn: &Connection,
    owner: &OwnerId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<IntakeInstance>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTAKE_COLUMNS} FROM intake_records
         WHERE owner_id = ?1 AND planned_at >= ?2 AND planned_at < ?3
         ORDER BY planned_at, medication_key"
    ))?;
    let rows = stmt.query_map(
        params![owner.as_str(), to_millis(start), to_millis(end)],
        |row| Ok(intake_row_from_rusqlite(row)),
    )?;

    let mut records = Vec::new();
    for row in rows {
        records.push(intake_from_row(row??)?);
    }
    Ok(records)
}

/// Rows whose owner column is null, blank, or a known placeholder.
pub fn find_unowned_intakes(conn: &Connection) -> Result<Vec<IntakeInstance>, DatabaseError> {
    let placeholders = std::iter::repeat("?")
        .take(SENTINEL_OWNER_IDS.len())
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTAKE_COLUMNS} FROM intake_records
         WHERE owner_id IS NULL OR TRIM(owner_id) = '' OR TRIM(owner_id) IN ({placeholders})
         ORDER BY planned_at, medication_key"
    ))?;
    let rows = stmt.query_map(params_from_iter(SENTINEL_OWNER_IDS.iter()), |row| {
        Ok(intake_row_from_rusqlite(row))
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(intake_from_row(row??)?);
    }
    Ok(records)
}

pub fn relabel_intake_owner(
    conn: &Connection,
    id: &Uuid,
    owner: &OwnerId,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE intake_records SET owner_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), owner.as_str(), to_millis(now)],
    )?;
    Ok(())
}

pub fn delete_intake(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM intake_records WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

/// Hard-delete cascade for one medication's history.
pub fn delete_intakes_for_medication(
    conn: &Connection,
    owner: &OwnerId,
    medication_key: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM intake_records WHERE owner_id = ?1 AND medication_key = ?2",
        params![owner.as_str(), medication_key],
    )?)
}

/// Age-based retention: drop rows of `owner` planned before `cutoff`.
pub fn delete_intakes_before(
    conn: &Connection,
    owner: &OwnerId,
    cutoff: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM intake_records WHERE owner_id = ?1 AND planned_at < ?2",
        params![owner.as_str(), to_millis(cutoff)],
    )?)
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct IntakeRow {
    id: String,
    owner_id: Option<String>,
    medication_name: String,
    medication_key: String,
    planned_at: i64,
    actual_at: Option<i64>,
    status: String,
    dosage: Option<String>,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn intake_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<IntakeRow, rusqlite::Error> {
    Ok(IntakeRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        medication_name: row.get(2)?,
        medication_key: row.get(3)?,
        planned_at: row.get(4)?,
        actual_at: row.get(5)?,
        status: row.get(6)?,
        dosage: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn intake_from_row(row: IntakeRow) -> Result<IntakeInstance, DatabaseError> {
    Ok(IntakeInstance {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        owner_id: row.owner_id.unwrap_or_default(),
        medication_name: row.medication_name,
        medication_key: row.medication_key,
        planned_at: from_millis(row.planned_at)?,
        actual_at: row.actual_at.map(from_millis).transpose()?,
        status: IntakeStatus::from_str(&row.status)?,
        dosage: row.dosage,
        notes: row.notes,
        created_at: from_millis(row.created_at)?,
        updated_at: from_millis(row.updated_at)?,
    })
}
