//! Medication catalog: recurring medication definitions per owner.
//!
//! Definitions are identified by `(owner, normalized name)`. Normal use
//! soft-deactivates; hard delete also removes the medication's intake
//! history.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, begin_write};
use crate::error::AdherenceError;
use crate::models::enums::{FrequencyPattern, MedicationStatus};
use crate::models::*;

/// Free-text frequency label to pattern, as entered on forms or found on
/// prescriptions.
pub fn parse_frequency(label: &str) -> Result<FrequencyPattern, AdherenceError> {
    FrequencyPattern::from_label(label)
        .ok_or_else(|| AdherenceError::Validation(format!("unrecognized frequency '{}'", label.trim())))
}

struct ValidInput {
    owner: OwnerId,
    name: String,
    dosage_amount: String,
    dosage_unit: String,
    window: ActiveWindow,
    notes: Option<String>,
}

fn validate(input: &MedicationInput) -> Result<ValidInput, AdherenceError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AdherenceError::Validation("medication name is empty".into()));
    }
    let owner = OwnerId::parse(&input.owner_id)?;
    let window = input.active_window.unwrap_or_default();
    if !window.is_ordered() {
        return Err(AdherenceError::Validation(format!(
            "active window ends before it starts ({:?} > {:?})",
            window.start, window.end
        )));
    }
    Ok(ValidInput {
        owner,
        name: name.to_string(),
        dosage_amount: input.dosage_amount.trim().to_string(),
        dosage_unit: input.dosage_unit.trim().to_string(),
        window,
        notes: input
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
    })
}

fn deactivation_for(
    status: MedicationStatus,
    previous: Option<&MedicationDefinition>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match status {
        MedicationStatus::Active => None,
        MedicationStatus::Inactive => previous.and_then(|p| p.deactivated_at).or(Some(now)),
    }
}

/// Keep the inactivity history in step with a status change.
fn record_transition(
    conn: &Connection,
    id: &Uuid,
    from: Option<MedicationStatus>,
    to: MedicationStatus,
    now: DateTime<Utc>,
) -> Result<(), db::DatabaseError> {
    match (from, to) {
        (None | Some(MedicationStatus::Active), MedicationStatus::Inactive) => {
            db::open_inactive_period(conn, id, now)
        }
        (Some(MedicationStatus::Inactive), MedicationStatus::Active) => {
            db::close_inactive_periods(conn, id, now).map(|_| ())
        }
        _ => Ok(()),
    }
}

/// Create a new definition. A definition with the same name already existing
/// for the owner is a validation error.
pub fn create_medication(
    conn: &Connection,
    input: &MedicationInput,
    now: DateTime<Utc>,
) -> Result<MedicationDefinition, AdherenceError> {
    let valid = validate(input)?;
    let tx = begin_write(conn)?;
    if db::get_medication_by_key(&tx, &valid.owner, &medication_key(&valid.name))?.is_some() {
        return Err(AdherenceError::Validation(format!(
            "medication '{}' already exists",
            valid.name
        )));
    }
    let definition = MedicationDefinition {
        id: Uuid::new_v4(),
        owner_id: valid.owner,
        name: valid.name,
        dosage_amount: valid.dosage_amount,
        dosage_unit: valid.dosage_unit,
        frequency: input.frequency,
        active_window: valid.window,
        status: input.status,
        notes: valid.notes,
        created_at: now,
        updated_at: now,
        deactivated_at: deactivation_for(input.status, None, now),
    };
    db::insert_medication(&tx, &definition)?;
    record_transition(&tx, &definition.id, None, definition.status, now)?;
    tx.commit()?;

    tracing::info!(owner = %definition.owner_id, medication = %definition.name, "Medication created");
    Ok(definition)
}

/// Insert, or update the definition with the same normalized name.
pub fn save_medication(
    conn: &Connection,
    input: &MedicationInput,
    now: DateTime<Utc>,
) -> Result<MedicationDefinition, AdherenceError> {
    let valid = validate(input)?;
    let tx = begin_write(conn)?;
    let existing = db::get_medication_by_key(&tx, &valid.owner, &medication_key(&valid.name))?;
    let created = existing.is_none();
    let definition = MedicationDefinition {
        id: existing.as_ref().map_or_else(Uuid::new_v4, |e| e.id),
        owner_id: valid.owner,
        name: valid.name,
        dosage_amount: valid.dosage_amount,
        dosage_unit: valid.dosage_unit,
        frequency: input.frequency,
        active_window: valid.window,
        status: input.status,
        notes: valid.notes,
        created_at: existing.as_ref().map_or(now, |e| e.created_at),
        updated_at: now,
        deactivated_at: deactivation_for(input.status, existing.as_ref(), now),
    };
    if created {
        db::insert_medication(&tx, &definition)?;
    } else {
        db::update_medication(&tx, &definition)?;
    }
    record_transition(&tx, &definition.id, existing.map(|e| e.status), definition.status, now)?;
    tx.commit()?;

    tracing::info!(
        owner = %definition.owner_id,
        medication = %definition.name,
        created,
        "Medication saved"
    );
    Ok(definition)
}

/// Edit an existing definition by id. Renaming is allowed; intake history
/// recorded under the old name stays under the old name.
pub fn update_medication(
    conn: &Connection,
    id: &Uuid,
    input: &MedicationInput,
    now: DateTime<Utc>,
) -> Result<MedicationDefinition, AdherenceError> {
    let valid = validate(input)?;
    let tx = begin_write(conn)?;
    let current = db::get_medication(&tx, id)?
        .filter(|m| m.owner_id == valid.owner)
        .ok_or_else(|| AdherenceError::Validation(format!("no medication {id} for this owner")))?;

    let new_key = medication_key(&valid.name);
    if new_key != current.name_key() {
        if db::get_medication_by_key(&tx, &valid.owner, &new_key)?.is_some() {
            return Err(AdherenceError::Validation(format!(
                "medication '{}' already exists",
                valid.name
            )));
        }
        tracing::info!(
            owner = %valid.owner,
            from = %current.name,
            to = %valid.name,
            "Medication renamed; earlier intake history keeps the old name"
        );
    }

    let previous_status = current.status;
    let definition = MedicationDefinition {
        name: valid.name,
        dosage_amount: valid.dosage_amount,
        dosage_unit: valid.dosage_unit,
        frequency: input.frequency,
        active_window: valid.window,
        status: input.status,
        notes: valid.notes,
        updated_at: now,
        deactivated_at: deactivation_for(input.status, Some(&current), now),
        ..current
    };
    db::update_medication(&tx, &definition)?;
    record_transition(&tx, &definition.id, Some(previous_status), definition.status, now)?;
    tx.commit()?;
    Ok(definition)
}

pub fn get_medication(
    conn: &Connection,
    owner: &OwnerId,
    name: &str,
) -> Result<Option<MedicationDefinition>, AdherenceError> {
    Ok(db::get_medication_by_key(conn, owner, &medication_key(name))?)
}

pub fn list_medications(
    conn: &Connection,
    owner: &OwnerId,
    status: Option<MedicationStatus>,
) -> Result<Vec<MedicationDefinition>, AdherenceError> {
    Ok(db::list_medications(conn, owner, status)?)
}

pub fn search_medications(
    conn: &Connection,
    owner: &OwnerId,
    fragment: &str,
) -> Result<Vec<MedicationDefinition>, AdherenceError> {
    if fragment.trim().is_empty() {
        return list_medications(conn, owner, None);
    }
    Ok(db::search_medications(conn, owner, fragment)?)
}

/// Change lifecycle status. Returns false when the medication does not exist.
pub fn set_status(
    conn: &Connection,
    owner: &OwnerId,
    name: &str,
    status: MedicationStatus,
    now: DateTime<Utc>,
) -> Result<bool, AdherenceError> {
    let tx = begin_write(conn)?;
    let Some(current) = db::get_medication_by_key(&tx, owner, &medication_key(name))? else {
        return Ok(false);
    };
    if current.status == status {
        return Ok(true);
    }
    let deactivated_at = deactivation_for(status, Some(&current), now);
    db::set_medication_status(&tx, &current.id, status, deactivated_at, now)?;
    record_transition(&tx, &current.id, Some(current.status), status, now)?;
    tx.commit()?;

    tracing::info!(owner = %owner, medication = %current.name, status = %status, "Medication status changed");
    Ok(true)
}

pub fn deactivate(
    conn: &Connection,
    owner: &OwnerId,
    name: &str,
    now: DateTime<Utc>,
) -> Result<bool, AdherenceError> {
    set_status(conn, owner, name, MedicationStatus::Inactive, now)
}

/// Counts removed by a hard delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeleteOutcome {
    pub definitions: usize,
    pub intake_records: usize,
}

/// Hard delete: the definition and every intake row for its name.
pub fn delete_with_history(
    conn: &Connection,
    owner: &OwnerId,
    name: &str,
) -> Result<DeleteOutcome, AdherenceError> {
    let key = medication_key(name);
    let tx = begin_write(conn)?;
    let outcome = DeleteOutcome {
        intake_records: db::delete_intakes_for_medication(&tx, owner, &key)?,
        definitions: db::delete_medication(&tx, owner, &key)?,
    };
    tx.commit()?;

    tracing::info!(
        owner = %owner,
        medication = %key,
        definitions = outcome.definitions,
        intake_records = outcome.intake_records,
        "Medication deleted with history"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::parse("u1").unwrap()
    }

    fn input(name: &str, frequency: FrequencyPattern) -> MedicationInput {
        MedicationInput {
            owner_id: "u1".into(),
            name: name.into(),
            frequency,
            dosage_amount: "500".into(),
            dosage_unit: "mg".into(),
            active_window: None,
            status: MedicationStatus::Active,
            notes: None,
        }
    }

    #[test]
    fn empty_name_is_rejected_before_writing() {
        let conn = open_memory_database().unwrap();
        let err = create_medication(&conn, &input("   ", FrequencyPattern::OnceDaily), now()).unwrap_err();
        assert!(matches!(err, AdherenceError::Validation(_)));
        assert!(list_medications(&conn, &owner(), None).unwrap().is_empty());
    }

    #[test]
    fn placeholder_owner_is_an_ownership_error() {
        let conn = open_memory_database().unwrap();
        let mut bad = input("Aspirin", FrequencyPattern::OnceDaily);
        bad.owner_id = "0".into();
        let err = create_medication(&conn, &bad, now()).unwrap_err();
        assert!(matches!(err, AdherenceError::Ownership(_)));
    }

    #[test]
    fn reversed_window_is_rejected() {
        let conn = open_memory_database().unwrap();
        let mut bad = input("Aspirin", FrequencyPattern::OnceDaily);
        bad.active_window = Some(ActiveWindow {
            start: NaiveDate::from_ymd_opt(2026, 5, 1),
            end: NaiveDate::from_ymd_opt(2026, 4, 1),
        });
        assert!(create_medication(&conn, &bad, now()).is_err());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let conn = open_memory_database().unwrap();
        create_medication(&conn, &input("Aspirin", FrequencyPattern::OnceDaily), now()).unwrap();
        let err = create_medication(&conn, &input("aspirin", FrequencyPattern::OnceDaily), now()).unwrap_err();
        assert!(matches!(err, AdherenceError::Validation(_)));
    }

    #[test]
    fn save_upserts_by_normalized_name() {
        let conn = open_memory_database().unwrap();
        let first = save_medication(&conn, &input("Metformin", FrequencyPattern::OnceDaily), now()).unwrap();
        let second = save_medication(&conn, &input(" metformin ", FrequencyPattern::TwiceDaily), now()).unwrap();

        assert_eq!(first.id, second.id);
        let all = list_medications(&conn, &owner(), None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].frequency, FrequencyPattern::TwiceDaily);
    }

    #[test]
    fn deactivate_records_instant_and_reactivate_clears_it() {
        let conn = open_memory_database().unwrap();
        create_medication(&conn, &input("Aspirin", FrequencyPattern::OnceDaily), now()).unwrap();
        let later = now() + chrono::Duration::days(3);
        assert!(deactivate(&conn, &owner(), "Aspirin", later).unwrap());

        let stored = get_medication(&conn, &owner(), "aspirin").unwrap().unwrap();
        assert_eq!(stored.status, MedicationStatus::Inactive);
        assert_eq!(stored.deactivated_at, Some(later));

        let resumed = later + chrono::Duration::days(2);
        set_status(&conn, &owner(), "Aspirin", MedicationStatus::Active, resumed).unwrap();
        let stored = get_medication(&conn, &owner(), "aspirin").unwrap().unwrap();
        assert!(stored.deactivated_at.is_none());

        let periods = db::load_inactive_periods(&conn, &owner()).unwrap();
        let history = &periods[&stored.id];
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].paused_at, later);
        assert_eq!(history[0].resumed_at, Some(resumed));
    }

    #[test]
    fn saving_as_inactive_opens_a_period_once() {
        let conn = open_memory_database().unwrap();
        let mut stopped = input("Aspirin", FrequencyPattern::OnceDaily);
        stopped.status = MedicationStatus::Inactive;
        let med = create_medication(&conn, &stopped, now()).unwrap();
        save_medication(&conn, &stopped, now() + chrono::Duration::days(1)).unwrap();

        let periods = db::load_inactive_periods(&conn, &owner()).unwrap();
        assert_eq!(periods[&med.id].len(), 1);
        assert!(periods[&med.id][0].is_open());
    }

    #[test]
    fn deactivating_unknown_medication_returns_false() {
        let conn = open_memory_database().unwrap();
        assert!(!deactivate(&conn, &owner(), "Ghost", now()).unwrap());
    }

    #[test]
    fn rename_conflicting_with_existing_name_fails() {
        let conn = open_memory_database().unwrap();
        let a = create_medication(&conn, &input("Aspirin", FrequencyPattern::OnceDaily), now()).unwrap();
        create_medication(&conn, &input("Ibuprofen", FrequencyPattern::OnceDaily), now()).unwrap();
        let err = update_medication(&conn, &a.id, &input("IBUPROFEN", FrequencyPattern::OnceDaily), now());
        assert!(err.is_err());

        let renamed = update_medication(&conn, &a.id, &input("Aspirin EC", FrequencyPattern::OnceDaily), now()).unwrap();
        assert_eq!(renamed.id, a.id);
        assert_eq!(renamed.created_at, a.created_at);
    }

    #[test]
    fn search_with_blank_fragment_lists_all() {
        let conn = open_memory_database().unwrap();
        create_medication(&conn, &input("Aspirin", FrequencyPattern::OnceDaily), now()).unwrap();
        create_medication(&conn, &input("Ibuprofen", FrequencyPattern::AsNeeded), now()).unwrap();
        assert_eq!(search_medications(&conn, &owner(), " ").unwrap().len(), 2);
        assert_eq!(search_medications(&conn, &owner(), "prof").unwrap().len(), 1);
    }

    #[test]
    fn frequency_labels_parse_or_fail_validation() {
        assert_eq!(parse_frequency("每日一次").unwrap(), FrequencyPattern::OnceDaily);
        assert_eq!(parse_frequency("bid").unwrap(), FrequencyPattern::TwiceDaily);
        assert!(matches!(parse_frequency("every full moon"), Err(AdherenceError::Validation(_))));
    }
}
