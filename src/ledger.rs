//! Intake ledger: one row per `(owner, medication, planned instant)`.
//!
//! Every check-then-write runs in an immediate transaction on top of the
//! unique natural-key index, so concurrent writers (startup expansion,
//! manual check-in, reminder expansion, sync import) can never produce a
//! second row for the same key.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{self, begin_write};
use crate::error::AdherenceError;
use crate::models::enums::IntakeStatus;
use crate::models::*;

/// What `mark_taken` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    /// No row existed; one was created already taken.
    Created,
    /// A planned row became taken.
    Transitioned,
    /// The row was already taken and kept its first actual time.
    AlreadyTaken,
}

fn new_record(
    owner: &OwnerId,
    medication_name: &str,
    planned_at: DateTime<Utc>,
    status: IntakeStatus,
    actual_at: Option<DateTime<Utc>>,
    dosage: Option<String>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> IntakeInstance {
    IntakeInstance {
        id: Uuid::new_v4(),
        owner_id: owner.as_str().to_string(),
        medication_name: medication_name.trim().to_string(),
        medication_key: medication_key(medication_name),
        planned_at,
        actual_at,
        status,
        dosage,
        notes,
        created_at: now,
        updated_at: now,
    }
}

fn check_name(name: &str) -> Result<(), AdherenceError> {
    if name.trim().is_empty() {
        return Err(AdherenceError::Validation("medication name is empty".into()));
    }
    Ok(())
}

/// Insert a planned row unless one exists for the natural key. Existing rows
/// are left untouched. Returns whether a row was inserted.
pub fn upsert_planned(conn: &Connection, entry: &PlannedEntry, now: DateTime<Utc>) -> Result<bool, AdherenceError> {
    check_name(&entry.medication_name)?;
    let record = new_record(
        &entry.owner_id,
        &entry.medication_name,
        entry.planned_at,
        IntakeStatus::Planned,
        None,
        entry.dosage.clone(),
        entry.notes.clone(),
        now,
    );
    let inserted = db::insert_intake_if_absent(conn, &record)?;
    if inserted {
        tracing::debug!(
            owner = %entry.owner_id,
            medication = %record.medication_key,
            planned_at = %entry.planned_at,
            "Planned intake inserted"
        );
    }
    Ok(inserted)
}

/// Record a dose as taken. Creates the row when nothing was planned.
pub fn mark_taken(
    conn: &Connection,
    owner: &OwnerId,
    medication_name: &str,
    planned_at: DateTime<Utc>,
    actual_at: DateTime<Utc>,
    dosage: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, AdherenceError> {
    check_name(medication_name)?;
    let key = NaturalKey::new(owner.clone(), medication_name, planned_at);
    let tx = begin_write(conn)?;

    let outcome = if db::set_intake_taken(&tx, &key, actual_at, dosage, now)? {
        MarkOutcome::Transitioned
    } else {
        let record = new_record(
            owner,
            medication_name,
            planned_at,
            IntakeStatus::Taken,
            Some(actual_at),
            dosage.map(str::to_string),
            None,
            now,
        );
        if db::insert_intake_if_absent(&tx, &record)? {
            MarkOutcome::Created
        } else {
            MarkOutcome::AlreadyTaken
        }
    };
    tx.commit()?;

    tracing::info!(
        owner = %owner,
        medication = %key.medication_key,
        planned_at = %planned_at,
        outcome = ?outcome,
        "Intake marked taken"
    );
    Ok(outcome)
}

/// Revert a taken dose to planned. A missing or already planned row is a no-op.
pub fn mark_untaken(
    conn: &Connection,
    owner: &OwnerId,
    medication_name: &str,
    planned_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, AdherenceError> {
    let key = NaturalKey::new(owner.clone(), medication_name, planned_at);
    let changed = db::set_intake_planned(conn, &key, now)?;
    tracing::info!(owner = %owner, medication = %key.medication_key, changed, "Intake marked untaken");
    Ok(changed)
}

pub fn find_for_range(
    conn: &Connection,
    owner: &OwnerId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<IntakeInstance>, AdherenceError> {
    if end <= start {
        return Ok(Vec::new());
    }
    Ok(db::find_intakes_in_range(conn, owner, start, end)?)
}

/// Rows planned within local day `day`.
pub fn find_for_day(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    day: NaiveDate,
) -> Result<Vec<IntakeInstance>, AdherenceError> {
    let (start, end) = clock.day_bounds(day);
    find_for_range(conn, owner, start, end)
}

/// Rows of the last `days` local days, today included.
pub fn find_recent(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    days: u32,
) -> Result<Vec<IntakeInstance>, AdherenceError> {
    if days == 0 {
        return Ok(Vec::new());
    }
    let today = clock.today();
    let first = today - Duration::days(days as i64 - 1);
    let (start, _) = clock.day_bounds(first);
    let (_, end) = clock.day_bounds(today);
    find_for_range(conn, owner, start, end)
}

/// Delete rows planned before the start of local day `today - days_to_keep`.
pub fn purge_older_than(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    days_to_keep: u32,
) -> Result<usize, AdherenceError> {
    let cutoff_day = clock.today() - Duration::days(days_to_keep as i64);
    let (cutoff, _) = clock.day_bounds(cutoff_day);
    let removed = db::delete_intakes_before(conn, owner, cutoff)?;
    tracing::info!(owner = %owner, days_to_keep, removed, "Retention cleanup");
    Ok(removed)
}

// ═══════════════════════════════════════════
// Ownership reconciliation
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Unowned rows given to the current owner.
    pub relabeled: usize,
    /// Unowned rows that replaced an owned duplicate.
    pub replaced_owned: usize,
    /// Unowned rows dropped in favour of an owned duplicate.
    pub discarded: usize,
}

/// Prefer the row that records an actual intake, then the later edit.
/// Ties go to `owned`.
fn unowned_wins(owned: &IntakeInstance, unowned: &IntakeInstance) -> bool {
    match (owned.actual_at.is_some(), unowned.actual_at.is_some()) {
        (false, true) => true,
        (true, false) => false,
        _ => unowned.updated_at > owned.updated_at,
    }
}

/// Give rows written without a usable owner to `owner`, merging into any
/// row that already holds the same natural key.
pub fn reconcile_ownership(
    conn: &Connection,
    owner: &OwnerId,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, AdherenceError> {
    let tx = begin_write(conn)?;
    let mut outcome = ReconcileOutcome::default();

    // Settle duplicates among unowned rows on their own timestamps first;
    // relabelling stamps `updated_at` and would skew later comparisons.
    let mut candidates: BTreeMap<(String, DateTime<Utc>), IntakeInstance> = BTreeMap::new();
    for unowned in db::find_unowned_intakes(&tx)? {
        match candidates.entry((unowned.medication_key.clone(), unowned.planned_at)) {
            Entry::Vacant(slot) => {
                slot.insert(unowned);
            }
            Entry::Occupied(mut slot) => {
                if unowned_wins(slot.get(), &unowned) {
                    db::delete_intake(&tx, &slot.get().id)?;
                    slot.insert(unowned);
                } else {
                    db::delete_intake(&tx, &unowned.id)?;
                }
                outcome.discarded += 1;
            }
        }
    }

    for unowned in candidates.into_values() {
        let key = NaturalKey::new(owner.clone(), &unowned.medication_key, unowned.planned_at);
        match db::get_intake_by_key(&tx, &key)? {
            None => {
                db::relabel_intake_owner(&tx, &unowned.id, owner, now)?;
                outcome.relabeled += 1;
            }
            Some(owned) if unowned_wins(&owned, &unowned) => {
                db::delete_intake(&tx, &owned.id)?;
                db::relabel_intake_owner(&tx, &unowned.id, owner, now)?;
                outcome.replaced_owned += 1;
            }
            Some(_) => {
                db::delete_intake(&tx, &unowned.id)?;
                outcome.discarded += 1;
            }
        }
    }
    tx.commit()?;

    if outcome != ReconcileOutcome::default() {
        tracing::info!(
            owner = %owner,
            relabeled = outcome.relabeled,
            replaced_owned = outcome.replaced_owned,
            discarded = outcome.discarded,
            "Reconciled unowned intake records"
        );
    }
    Ok(outcome)
}

// ═══════════════════════════════════════════
// Day statistics
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayStats {
    pub total: usize,
    pub taken: usize,
    pub on_time: usize,
    /// Taken over total, 0.0 for an empty day.
    pub completion_rate: f64,
    pub all_taken: bool,
}

impl DayStats {
    pub fn from_records(records: &[IntakeInstance], on_time_window: Duration) -> Self {
        let total = records.len();
        let taken = records.iter().filter(|r| r.is_taken()).count();
        let on_time = records.iter().filter(|r| r.is_on_time(on_time_window)).count();
        Self {
            total,
            taken,
            on_time,
            completion_rate: if total == 0 { 0.0 } else { taken as f64 / total as f64 },
            all_taken: total > 0 && taken == total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::sqlite::open_memory_database;
    use crate::db::Database;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn owner() -> OwnerId {
        OwnerId::parse("u1").unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
    }

    fn entry(name: &str, planned_at: DateTime<Utc>) -> PlannedEntry {
        PlannedEntry {
            owner_id: owner(),
            medication_name: name.into(),
            planned_at,
            dosage: Some("1 tablet".into()),
            notes: None,
        }
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM intake_records", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn upsert_planned_is_idempotent() {
        let conn = open_memory_database().unwrap();
        assert!(upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap());
        assert!(!upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn upsert_planned_never_downgrades_taken_row() {
        let conn = open_memory_database().unwrap();
        mark_taken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 5), None, at(8, 5)).unwrap();
        upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(9, 0)).unwrap();
        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_taken());
    }

    #[test]
    fn mark_taken_self_heals_missing_row() {
        let conn = open_memory_database().unwrap();
        let outcome = mark_taken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 10), Some("2 tablets"), at(8, 10)).unwrap();
        assert_eq!(outcome, MarkOutcome::Created);

        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, IntakeStatus::Taken);
        assert_eq!(rows[0].actual_at, Some(at(8, 10)));
        assert_eq!(rows[0].dosage.as_deref(), Some("2 tablets"));
    }

    #[test]
    fn mark_taken_twice_keeps_first_actual_time() {
        let conn = open_memory_database().unwrap();
        upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap();
        assert_eq!(
            mark_taken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 1), None, at(8, 1)).unwrap(),
            MarkOutcome::Transitioned
        );
        assert_eq!(
            mark_taken(&conn, &owner(), "aspirin", at(8, 0), at(9, 0), None, at(9, 0)).unwrap(),
            MarkOutcome::AlreadyTaken
        );
        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows[0].actual_at, Some(at(8, 1)));
        assert_eq!(rows[0].dosage.as_deref(), Some("1 tablet"));
    }

    #[test]
    fn mark_then_unmark_restores_planned() {
        let conn = open_memory_database().unwrap();
        upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap();
        mark_taken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 1), None, at(8, 1)).unwrap();
        assert!(mark_untaken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 2)).unwrap());

        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows[0].status, IntakeStatus::Planned);
        assert!(rows[0].actual_at.is_none());
        assert!(!mark_untaken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 3)).unwrap());
    }

    #[test]
    fn unmark_of_missing_row_is_a_noop() {
        let conn = open_memory_database().unwrap();
        assert!(!mark_untaken(&conn, &owner(), "Ghost", at(8, 0), at(8, 0)).unwrap());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn empty_name_is_rejected() {
        let conn = open_memory_database().unwrap();
        let err = upsert_planned(&conn, &entry("  ", at(8, 0)), at(7, 0)).unwrap_err();
        assert!(matches!(err, AdherenceError::Validation(_)));
    }

    #[test]
    fn reconcile_relabels_and_merges() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO intake_records (id, owner_id, medication_name, medication_key, planned_at,
             actual_at, status, created_at, updated_at) VALUES
             ('{a}', NULL, 'Aspirin', 'aspirin', {p8}, {p8}, 'taken', 0, 10),
             ('{b}', '0', 'Vitamin C', 'vitamin c', {p8}, NULL, 'planned', 0, 10),
             ('{c}', '000000', 'Zinc', 'zinc', {p20}, NULL, 'planned', 0, 10);",
            a = Uuid::new_v4(),
            b = Uuid::new_v4(),
            c = Uuid::new_v4(),
            p8 = at(8, 0).timestamp_millis(),
            p20 = at(20, 0).timestamp_millis(),
        ))
        .unwrap();
        // Owned duplicates: Aspirin planned-only (loses), Vitamin C taken (wins).
        upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap();
        mark_taken(&conn, &owner(), "Vitamin C", at(8, 0), at(8, 3), None, at(8, 3)).unwrap();

        let outcome = reconcile_ownership(&conn, &owner(), at(21, 0)).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome { relabeled: 1, replaced_owned: 1, discarded: 1 }
        );

        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.is_taken() || r.medication_key == "zinc"));
        assert!(db::find_unowned_intakes(&conn).unwrap().is_empty());
    }

    #[test]
    fn reconcile_keeps_the_newest_of_duplicate_unowned_rows() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO intake_records (id, owner_id, medication_name, medication_key, planned_at,
             actual_at, status, notes, created_at, updated_at) VALUES
             ('{a}', NULL, 'Aspirin', 'aspirin', {p8}, NULL, 'planned', 'older', 0, 10),
             ('{b}', '0', 'Aspirin', 'aspirin', {p8}, NULL, 'planned', 'newer', 0, 20);",
            a = Uuid::new_v4(),
            b = Uuid::new_v4(),
            p8 = at(8, 0).timestamp_millis(),
        ))
        .unwrap();

        let outcome = reconcile_ownership(&conn, &owner(), at(21, 0)).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome { relabeled: 1, replaced_owned: 0, discarded: 1 }
        );
        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].notes.as_deref(), Some("newer"));
    }

    #[test]
    fn reconcile_tie_break_uses_latest_update() {
        let owned = IntakeInstance {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            medication_name: "A".into(),
            medication_key: "a".into(),
            planned_at: at(8, 0),
            actual_at: None,
            status: IntakeStatus::Planned,
            dosage: None,
            notes: None,
            created_at: at(7, 0),
            updated_at: at(7, 0),
        };
        let mut unowned = owned.clone();
        unowned.updated_at = at(7, 30);
        assert!(unowned_wins(&owned, &unowned));
        unowned.updated_at = at(7, 0);
        assert!(!unowned_wins(&owned, &unowned));
    }

    #[test]
    fn find_recent_and_purge_use_local_days() {
        let conn = open_memory_database().unwrap();
        let clock = ManualClock::utc(at(12, 0));
        upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap();
        upsert_planned(&conn, &entry("Aspirin", at(8, 0) - Duration::days(2)), at(7, 0)).unwrap();
        upsert_planned(&conn, &entry("Aspirin", at(8, 0) - Duration::days(40)), at(7, 0)).unwrap();

        assert_eq!(find_recent(&conn, &clock, &owner(), 1).unwrap().len(), 1);
        assert_eq!(find_recent(&conn, &clock, &owner(), 3).unwrap().len(), 2);
        assert_eq!(purge_older_than(&conn, &clock, &owner(), 30).unwrap(), 1);
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn day_stats_counts_on_time_doses() {
        let conn = open_memory_database().unwrap();
        upsert_planned(&conn, &entry("A", at(8, 0)), at(7, 0)).unwrap();
        upsert_planned(&conn, &entry("B", at(8, 0)), at(7, 0)).unwrap();
        mark_taken(&conn, &owner(), "A", at(8, 0), at(8, 20), None, at(8, 20)).unwrap();
        mark_taken(&conn, &owner(), "C", at(12, 0), at(14, 0), None, at(14, 0)).unwrap();

        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        let stats = DayStats::from_records(&rows, Duration::minutes(30));
        assert_eq!((stats.total, stats.taken, stats.on_time), (3, 2, 1));
        assert!(!stats.all_taken);
        assert!((stats.completion_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_writers_leave_one_row_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("ledger.db")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let conn = db.connect().unwrap();
                    for _ in 0..10 {
                        if i % 2 == 0 {
                            upsert_planned(&conn, &entry("Aspirin", at(8, 0)), at(7, 0)).unwrap();
                        } else {
                            mark_taken(&conn, &owner(), "Aspirin", at(8, 0), at(8, 5), None, at(8, 5)).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let conn = db.connect().unwrap();
        assert_eq!(count(&conn), 1);
        let rows = find_for_range(&conn, &owner(), at(0, 0), at(23, 0)).unwrap();
        assert!(rows[0].is_taken());
    }
}
