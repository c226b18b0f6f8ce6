use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{date_from_text, date_to_text, from_millis, to_millis};
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const MEDICATION_COLUMNS: &str = "id, owner_id, name, dosage_amount, dosage_unit, frequency,
     start_date, end_date, status, notes, created_at, updated_at, deactivated_at";

pub fn insert_medication(conn: &Connection, med: &MedicationDefinition) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, owner_id, name, name_key, dosage_amount, dosage_unit,
         frequency, start_date, end_date, status, notes, created_at, updated_at, deactivated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            med.id.to_string(),
            med.owner_id.as_str(),
            med.name,
            med.name_key(),
            med.dosage_amount,
            med.dosage_unit,
            med.frequency.as_str(),
            date_to_text(med.active_window.start),
            date_to_text(med.active_window.end),
            med.status.as_str(),
            med.notes,
            to_millis(med.created_at),
            to_millis(med.updated_at),
            med.deactivated_at.map(to_millis),
        ],
    )?;
    Ok(())
}

/// Overwrite the editable fields of an existing definition, matched by id.
pub fn update_medication(conn: &Connection, med: &MedicationDefinition) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET name = ?2, name_key = ?3, dosage_amount = ?4, dosage_unit = ?5,
         frequency = ?6, start_date = ?7, end_date = ?8, status = ?9, notes = ?10,
         updated_at = ?11, deactivated_at = ?12
         WHERE id = ?1",
        params![
            med.id.to_string(),
            med.name,
            med.name_key(),
            med.dosage_amount,
            med.dosage_unit,
            med.frequency.as_str(),
            date_to_text(med.active_window.start),
            date_to_text(med.active_window.end),
            med.status.as_str(),
            med.notes,
            to_millis(med.updated_at),
            med.deactivated_at.map(to_millis),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Medication".into(),
            id: med.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_medication_by_key(
    conn: &Connection,
    owner: &OwnerId,
    name_key: &str,
) -> Result<Option<MedicationDefinition>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE owner_id = ?1 AND name_key = ?2"),
            params![owner.as_str(), name_key],
            medication_row_from_rusqlite,
        )
        .optional()?;
    row.map(medication_from_row).transpose()
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<Option<MedicationDefinition>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
            params![id.to_string()],
            medication_row_from_rusqlite,
        )
        .optional()?;
    row.map(medication_from_row).transpose()
}

/// All definitions of one owner, optionally filtered by status, ordered by name.
pub fn list_medications(
    conn: &Connection,
    owner: &OwnerId,
    status: Option<MedicationStatus>,
) -> Result<Vec<MedicationDefinition>, DatabaseError> {
    load_medications_lenient(conn, owner, status)?
        .into_iter()
        .collect()
}

/// Like [`list_medications`] but keeps rows that fail to decode as
/// individual errors, so one malformed definition does not hide the rest.
pub fn load_medications_lenient(
    conn: &Connection,
    owner: &OwnerId,
    status: Option<MedicationStatus>,
) -> Result<Vec<Result<MedicationDefinition, DatabaseError>>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY name_key"
    ))?;
    let rows = stmt.query_map(
        params![owner.as_str(), status.map(|s| s.as_str())],
        |row| Ok(medication_row_from_rusqlite(row)),
    )?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(row?.map_err(DatabaseError::from).and_then(medication_from_row));
    }
    Ok(meds)
}

/// Case-insensitive substring search on the display name.
pub fn search_medications(
    conn: &Connection,
    owner: &OwnerId,
    fragment: &str,
) -> Result<Vec<MedicationDefinition>, DatabaseError> {
    let pattern = format!("%{}%", fragment.trim());
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE owner_id = ?1 AND LOWER(name) LIKE LOWER(?2)
         ORDER BY name_key"
    ))?;
    let rows = stmt.query_map(params![owner.as_str(), pattern], |row| {
        Ok(medication_row_from_rusqlite(row))
    })?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

pub fn set_medication_status(
    conn: &Connection,
    id: &Uuid,
    status: MedicationStatus,
    deactivated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET status = ?2, deactivated_at = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            deactivated_at.map(to_millis),
            to_millis(now),
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_medication(conn: &Connection, owner: &OwnerId, name_key: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM medications WHERE owner_id = ?1 AND name_key = ?2",
        params![owner.as_str(), name_key],
    )?)
}

// ═══════════════════════════════════════════
// Inactivity history
// ═══════════════════════════════════════════

pub fn open_inactive_period(conn: &Connection, id: &Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO medication_inactive_periods (medication_id, paused_at)
         VALUES (?1, ?2)",
        params![id.to_string(), to_millis(at)],
    )?;
    Ok(())
}

/// Close every open period of the medication. Returns how many were closed.
pub fn close_inactive_periods(conn: &Connection, id: &Uuid, at: DateTime<Utc>) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE medication_inactive_periods SET resumed_at = ?2
         WHERE medication_id = ?1 AND resumed_at IS NULL",
        params![id.to_string(), to_millis(at)],
    )?)
}

/// Inactivity history of all the owner's medications, keyed by medication id.
pub fn load_inactive_periods(
    conn: &Connection,
    owner: &OwnerId,
) -> Result<HashMap<Uuid, Vec<InactivePeriod>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT p.medication_id, p.paused_at, p.resumed_at
         FROM medication_inactive_periods p
         JOIN medications m ON m.id = p.medication_id
         WHERE m.owner_id = ?1
         ORDER BY p.medication_id, p.paused_at",
    )?;
    let rows = stmt.query_map(params![owner.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;

    let mut periods: HashMap<Uuid, Vec<InactivePeriod>> = HashMap::new();
    for row in rows {
        let (id, paused_at, resumed_at) = row?;
        let medication_id =
            Uuid::parse_str(&id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
        periods.entry(medication_id).or_default().push(InactivePeriod {
            medication_id,
            paused_at: from_millis(paused_at)?,
            resumed_at: resumed_at.map(from_millis).transpose()?,
        });
    }
    Ok(periods)
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct MedicationRow {
    id: String,
    owner_id: String,
    name: String,
    dosage_amount: String,
    dosage_unit: String,
    frequency: String,
    start_date: Option<String>,
    end_date: Option<String>,
    status: String,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
    deactivated_at: Option<i64>,
}

fn medication_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        dosage_amount: row.get(3)?,
        dosage_unit: row.get(4)?,
        frequency: row.get(5)?,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        status: row.get(8)?,
        notes: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        deactivated_at: row.get(12)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<MedicationDefinition, DatabaseError> {
    // Older clients stored the display label ("每日2次") rather than the key.
    let frequency = FrequencyPattern::from_label(&row.frequency).ok_or_else(|| {
        DatabaseError::InvalidEnum {
            field: "FrequencyPattern".into(),
            value: row.frequency.clone(),
        }
    })?;
    Ok(MedicationDefinition {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        owner_id: OwnerId::parse(&row.owner_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        name: row.name,
        dosage_amount: row.dosage_amount,
        dosage_unit: row.dosage_unit,
        frequency,
        active_window: ActiveWindow {
            start: date_from_text(row.start_date, "start_date")?,
            end: date_from_text(row.end_date, "end_date")?,
        },
        status: MedicationStatus::from_str(&row.status)?,
        notes: row.notes,
        created_at: from_millis(row.created_at)?,
        updated_at: from_millis(row.updated_at)?,
        deactivated_at: row.deactivated_at.map(from_millis).transpose()?,
    })
}
