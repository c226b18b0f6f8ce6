//! Per-day adherence: tri-state status, day detail, month grid.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::EmptyDayPolicy;
use crate::db;
use crate::error::AdherenceError;
use crate::ledger::{self, DayStats};
use crate::models::enums::{DayStatus, MedicationStatus};
use crate::models::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAdherenceSummary {
    pub date: NaiveDate,
    pub total_planned: usize,
    pub total_taken: usize,
    pub status: DayStatus,
}

/// Whether `definition` should have produced doses on `day`, judged from
/// catalog history rather than the ledger. A day counts when the medication
/// was active for any part of it.
fn applicable_on(
    definition: &MedicationDefinition,
    inactive: &[InactivePeriod],
    schedule: &SlotSchedule,
    clock: &dyn Clock,
    day: NaiveDate,
) -> bool {
    let (day_start, day_end) = clock.day_bounds(day);
    let has_slot = definition
        .frequency
        .slot_keys()
        .iter()
        .any(|k| schedule.get(*k).is_some());
    let paused = inactive.iter().any(|p| p.covers(day_start, day_end));
    let live = !paused
        && match definition.status {
            MedicationStatus::Active => true,
            // Rows deactivated before the history table existed carry only the instant.
            MedicationStatus::Inactive => {
                inactive.iter().any(InactivePeriod::is_open)
                    || definition.deactivated_at.is_some_and(|at| at > day_start)
            }
        };
    has_slot
        && live
        && definition.active_window.contains(day)
        && clock.local_date(definition.created_at) <= day
}

/// Summaries for every local day in `[start, end)`. `cancel` is checked
/// between days.
pub fn summarize_range(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    start: NaiveDate,
    end: NaiveDate,
    policy: EmptyDayPolicy,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<DayAdherenceSummary>, AdherenceError> {
    if end <= start {
        return Ok(Vec::new());
    }
    let now = clock.now();
    let (range_start, _) = clock.day_bounds(start);
    let (range_end, _) = clock.day_bounds(end);

    let mut per_day: HashMap<NaiveDate, (usize, usize)> = HashMap::new();
    for record in ledger::find_for_range(conn, owner, range_start, range_end)? {
        let counts = per_day.entry(clock.local_date(record.planned_at)).or_default();
        counts.0 += 1;
        if record.is_taken() {
            counts.1 += 1;
        }
    }

    // Catalog state is only needed to judge empty past days.
    let (definitions, inactive, schedule) = match policy {
        EmptyDayPolicy::RequireApplicableMedication => (
            db::load_medications_lenient(conn, owner, None)?
                .into_iter()
                .filter_map(Result::ok)
                .filter(|d| d.frequency.is_scheduled())
                .collect::<Vec<_>>(),
            db::load_inactive_periods(conn, owner)?,
            db::load_slot_schedule(conn, owner)?,
        ),
        EmptyDayPolicy::FlagAllPastDays => (Vec::new(), HashMap::new(), SlotSchedule::default()),
    };

    let mut summaries = Vec::new();
    let mut day = start;
    while day < end {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(AdherenceError::Cancelled);
        }
        let (_, day_end) = clock.day_bounds(day);
        let past = now >= day_end;
        let (total, taken) = per_day.get(&day).copied().unwrap_or((0, 0));

        let status = if total > 0 {
            if taken == total {
                DayStatus::FullyTaken
            } else if past {
                DayStatus::IncompletePast
            } else {
                DayStatus::NoStatus
            }
        } else if !past {
            DayStatus::NoStatus
        } else {
            match policy {
                EmptyDayPolicy::FlagAllPastDays => DayStatus::IncompletePast,
                EmptyDayPolicy::RequireApplicableMedication => {
                    let applicable = definitions.iter().any(|d| {
                        let history = inactive.get(&d.id).map_or(&[][..], Vec::as_slice);
                        applicable_on(d, history, &schedule, clock, day)
                    });
                    if applicable {
                        DayStatus::IncompletePast
                    } else {
                        DayStatus::NoStatus
                    }
                }
            }
        };

        summaries.push(DayAdherenceSummary {
            date: day,
            total_planned: total,
            total_taken: taken,
            status,
        });
        day += Duration::days(1);
    }
    Ok(summaries)
}

/// `date → status` for `[start, end)`.
pub fn status_map(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    start: NaiveDate,
    end: NaiveDate,
    policy: EmptyDayPolicy,
) -> Result<BTreeMap<NaiveDate, DayStatus>, AdherenceError> {
    Ok(summarize_range(conn, clock, owner, start, end, policy, None)?
        .into_iter()
        .map(|s| (s.date, s.status))
        .collect())
}

// ═══════════════════════════════════════════
// Day detail & month grid
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayDetail {
    pub summary: DayAdherenceSummary,
    pub stats: DayStats,
    pub records: Vec<IntakeInstance>,
}

pub fn day_detail(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    day: NaiveDate,
    policy: EmptyDayPolicy,
    on_time_window: Duration,
) -> Result<DayDetail, AdherenceError> {
    let records = ledger::find_for_day(conn, clock, owner, day)?;
    let summary = summarize_range(conn, clock, owner, day, day + Duration::days(1), policy, None)?
        .into_iter()
        .next()
        .ok_or_else(|| AdherenceError::Validation(format!("no summary for {day}")))?;
    Ok(DayDetail {
        stats: DayStats::from_records(&records, on_time_window),
        summary,
        records,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarCell {
    pub date: NaiveDate,
    /// False for the fill days of the previous and next month.
    pub in_month: bool,
    pub is_today: bool,
    pub status: DayStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    /// 6 weeks × 7 days, weeks starting on Sunday.
    pub cells: Vec<CalendarCell>,
}

pub const GRID_CELLS: usize = 42;

pub fn month_grid(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    year: i32,
    month: u32,
    policy: EmptyDayPolicy,
) -> Result<MonthGrid, AdherenceError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AdherenceError::Validation(format!("invalid month {year}-{month}")))?;
    let lead = first.weekday().num_days_from_sunday() as i64;
    let grid_start = first - Duration::days(lead);
    let grid_end = grid_start + Duration::days(GRID_CELLS as i64);
    let today = clock.today();

    let cells = summarize_range(conn, clock, owner, grid_start, grid_end, policy, None)?
        .into_iter()
        .map(|s| CalendarCell {
            in_month: s.date.month() == month && s.date.year() == year,
            is_today: s.date == today,
            date: s.date,
            status: s.status,
        })
        .collect();

    Ok(MonthGrid { year, month, cells })
}
