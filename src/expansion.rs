//! Daily schedule expansion: catalog + slot times → planned ledger rows.
//!
//! Expansion only ever inserts missing rows, so running it again for the same
//! day, or concurrently from several triggers, converges on the same ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::{self, begin_write};
use crate::error::AdherenceError;
use crate::ledger::{self, DayStats};
use crate::models::enums::{MedicationStatus, SlotKey, TimeGroup};
use crate::models::*;

/// Result of expanding one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionReport {
    pub day: Option<NaiveDate>,
    pub inserted: usize,
    pub already_present: usize,
    /// Slots a due medication needed that have no configured time.
    pub unconfigured_slots: usize,
    /// Definitions that could not be read.
    pub malformed_definitions: usize,
}

/// Ensure every dose due on local day `day` has a ledger row.
pub fn expand_day(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    day: NaiveDate,
) -> Result<ExpansionReport, AdherenceError> {
    let now = clock.now();
    let mut report = ExpansionReport {
        day: Some(day),
        ..Default::default()
    };

    let tx = begin_write(conn)?;
    let schedule = db::load_slot_schedule(&tx, owner)?;
    for definition in db::load_medications_lenient(&tx, owner, Some(MedicationStatus::Active))? {
        let definition = match definition {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Skipping unreadable medication definition");
                report.malformed_definitions += 1;
                continue;
            }
        };
        if !definition.is_due_on(day) {
            continue;
        }

        let dosage = Some(definition.dosage_label()).filter(|d| !d.is_empty());
        for &slot in definition.frequency.slot_keys() {
            let Some(time) = schedule.get(slot) else {
                tracing::warn!(
                    owner = %owner,
                    medication = %definition.name,
                    slot = %slot,
                    "No time configured for slot, dose not planned"
                );
                report.unconfigured_slots += 1;
                continue;
            };
            let entry = PlannedEntry {
                owner_id: owner.clone(),
                medication_name: definition.name.clone(),
                planned_at: clock.from_local(day.and_time(time.to_naive_time())),
                dosage: dosage.clone(),
                notes: None,
            };
            match ledger::upsert_planned(&tx, &entry, now) {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.already_present += 1,
                Err(AdherenceError::Validation(reason)) => {
                    tracing::warn!(owner = %owner, reason = %reason, "Skipping invalid medication definition");
                    report.malformed_definitions += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        owner = %owner,
        day = %day,
        inserted = report.inserted,
        already_present = report.already_present,
        unconfigured_slots = report.unconfigured_slots,
        malformed = report.malformed_definitions,
        "Expanded daily schedule"
    );
    Ok(report)
}

/// Expand each day in `[start, end)`, checking `cancel` before every day.
/// Days finished before cancellation stay written.
pub fn expand_range(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    start: NaiveDate,
    end: NaiveDate,
    cancel: &AtomicBool,
) -> Result<Vec<ExpansionReport>, AdherenceError> {
    let mut reports = Vec::new();
    let mut day = start;
    while day < end {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(owner = %owner, stopped_at = %day, "Expansion cancelled");
            return Err(AdherenceError::Cancelled);
        }
        reports.push(expand_day(conn, clock, owner, day)?);
        day += Duration::days(1);
    }
    Ok(reports)
}

// ═══════════════════════════════════════════
// Today view
// ═══════════════════════════════════════════

/// One dose in the today list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodayDose {
    pub slot: Option<SlotKey>,
    pub time_group: TimeGroup,
    /// Local wall time, `HH:MM`.
    pub time: String,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub planned_at: DateTime<Utc>,
    pub actual_at: Option<DateTime<Utc>>,
    pub taken: bool,
    pub on_time: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodayView {
    pub date: NaiveDate,
    pub doses: Vec<TodayDose>,
    pub stats: DayStats,
}

fn group_for_hour(hour: u32) -> TimeGroup {
    match hour {
        0..=10 => TimeGroup::Morning,
        11..=15 => TimeGroup::Noon,
        _ => TimeGroup::Evening,
    }
}

/// Today's ledger rows annotated with the slot they came from. Read-only;
/// callers expand first when rows may be missing.
pub fn today_view(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    on_time_window: Duration,
) -> Result<TodayView, AdherenceError> {
    let today = clock.today();
    let records = ledger::find_for_day(conn, clock, owner, today)?;
    let schedule = db::load_slot_schedule(conn, owner)?;
    let slots_by_medication: HashMap<String, &'static [SlotKey]> =
        db::load_medications_lenient(conn, owner, None)?
            .into_iter()
            .filter_map(Result::ok)
            .map(|d| (d.name_key(), d.frequency.slot_keys()))
            .collect();

    let doses = records
        .iter()
        .map(|record| {
            let local = clock.to_local(record.planned_at);
            let local_time = local.time();
            let slot = slots_by_medication
                .get(&record.medication_key)
                .and_then(|keys| {
                    keys.iter()
                        .copied()
                        .find(|k| schedule.get(*k).map(|t| t.to_naive_time()) == Some(local_time))
                });
            TodayDose {
                slot,
                time_group: slot.map_or_else(|| group_for_hour(local.hour()), |s| s.time_group()),
                time: local.format("%H:%M").to_string(),
                medication_name: record.medication_name.clone(),
                dosage: record.dosage.clone(),
                planned_at: record.planned_at,
                actual_at: record.actual_at,
                taken: record.is_taken(),
                on_time: record.is_on_time(on_time_window),
            }
        })
        .collect();

    Ok(TodayView {
        date: today,
        doses,
        stats: DayStats::from_records(&records, on_time_window),
    })
}
