//! Reminder triggers derived from the same catalog and slot times the
//! expander uses. Registering them with the OS is left to a [`ReminderSink`].

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db;
use crate::error::AdherenceError;
use crate::models::enums::{MedicationStatus, SlotKey};
use crate::models::*;

/// One configured slot with the medications due in it today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTrigger {
    pub slot_key: SlotKey,
    pub hour: u32,
    pub minute: u32,
    pub medication_names: Vec<String>,
}

/// Slots that have at least one medication due today, ordered by time.
/// Slots without a configured time are absent.
pub fn slots_for_today(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
) -> Result<Vec<SlotTrigger>, AdherenceError> {
    slots_for_day(conn, owner, clock.today())
}

pub fn slots_for_day(
    conn: &Connection,
    owner: &OwnerId,
    day: NaiveDate,
) -> Result<Vec<SlotTrigger>, AdherenceError> {
    let schedule = db::load_slot_schedule(conn, owner)?;
    let mut by_slot: BTreeMap<SlotKey, Vec<String>> = BTreeMap::new();

    for definition in db::load_medications_lenient(conn, owner, Some(MedicationStatus::Active))? {
        let Ok(definition) = definition else { continue };
        if !definition.is_due_on(day) {
            continue;
        }
        for &slot in definition.frequency.slot_keys() {
            if schedule.get(slot).is_some() {
                by_slot.entry(slot).or_default().push(definition.name.clone());
            }
        }
    }

    let mut triggers: Vec<SlotTrigger> = by_slot
        .into_iter()
        .filter_map(|(slot_key, medication_names)| {
            schedule.get(slot_key).map(|time| SlotTrigger {
                slot_key,
                hour: time.hour(),
                minute: time.minute(),
                medication_names,
            })
        })
        .collect();
    triggers.sort_by_key(|t| (t.hour, t.minute, t.slot_key));
    Ok(triggers)
}

/// All slot triggers sharing one wall time, merged into a single reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub hour: u32,
    pub minute: u32,
    pub slot_keys: Vec<SlotKey>,
    pub medication_names: Vec<String>,
    pub message: String,
    pub next_fire: DateTime<Utc>,
}

pub fn reminder_message(names: &[String]) -> String {
    format!("Time to take: {}", names.join(" + "))
}

/// Next instant the wall clock reads `hour:minute`: today if still ahead,
/// otherwise tomorrow.
pub fn next_fire(clock: &dyn Clock, hour: u32, minute: u32) -> Result<DateTime<Utc>, AdherenceError> {
    let time = SlotTime::new(hour, minute)?.to_naive_time();
    let now = clock.now();
    let today = clock.today();
    let candidate = clock.from_local(today.and_time(time));
    if candidate > now {
        return Ok(candidate);
    }
    Ok(clock.from_local((today + Duration::days(1)).and_time(time)))
}

/// Merge triggers with identical times. Medication names are deduplicated
/// in first-seen order.
pub fn coalesce(clock: &dyn Clock, triggers: &[SlotTrigger]) -> Result<Vec<Reminder>, AdherenceError> {
    let mut by_time: BTreeMap<(u32, u32), (Vec<SlotKey>, Vec<String>)> = BTreeMap::new();
    for trigger in triggers {
        let (keys, names) = by_time.entry((trigger.hour, trigger.minute)).or_default();
        keys.push(trigger.slot_key);
        for name in &trigger.medication_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    by_time
        .into_iter()
        .map(|((hour, minute), (slot_keys, medication_names))| {
            Ok(Reminder {
                hour,
                minute,
                message: reminder_message(&medication_names),
                next_fire: next_fire(clock, hour, minute)?,
                slot_keys,
                medication_names,
            })
        })
        .collect()
}

/// Destination for computed reminders, typically the platform alarm service.
pub trait ReminderSink: Send + Sync {
    /// Replace every reminder previously registered for `owner`.
    fn replace_all(&self, owner: &OwnerId, reminders: &[Reminder]) -> Result<(), AdherenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::clock::ManualClock;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::FrequencyPattern;
    use crate::slots;
    use chrono::TimeZone;

    fn owner() -> OwnerId {
        OwnerId::parse("u1").unwrap()
    }

    fn add(conn: &Connection, name: &str, frequency: FrequencyPattern) {
        catalog::create_medication(
            conn,
            &MedicationInput {
                owner_id: "u1".into(),
                name: name.into(),
                frequency,
                dosage_amount: String::new(),
                dosage_unit: String::new(),
                active_window: None,
                status: MedicationStatus::Active,
                notes: None,
            },
            Utc::now(),
        )
        .unwrap();
    }

    fn clock(h: u32) -> ManualClock {
        ManualClock::utc(Utc.with_ymd_and_hms(2026, 6, 1, h, 0, 0).unwrap())
    }

    #[test]
    fn triggers_follow_catalog_and_slots() {
        let conn = open_memory_database().unwrap();
        add(&conn, "A", FrequencyPattern::OnceDaily);
        add(&conn, "B", FrequencyPattern::TwiceDaily);
        add(&conn, "Prn", FrequencyPattern::AsNeeded);
        slots::set_slot_time(&conn, &owner(), SlotKey::Once, 8, 0, Utc::now()).unwrap();
        slots::set_slot_time(&conn, &owner(), SlotKey::TwiceAm, 8, 0, Utc::now()).unwrap();

        let triggers = slots_for_today(&conn, &clock(6), &owner()).unwrap();
        assert_eq!(triggers.len(), 2);
        assert!(triggers.iter().all(|t| (t.hour, t.minute) == (8, 0)));
        assert!(!triggers.iter().any(|t| t.slot_key == SlotKey::TwicePm));
    }

    #[test]
    fn same_time_triggers_coalesce_into_one_reminder() {
        let conn = open_memory_database().unwrap();
        add(&conn, "A", FrequencyPattern::OnceDaily);
        add(&conn, "B", FrequencyPattern::TwiceDaily);
        slots::set_slot_time(&conn, &owner(), SlotKey::Once, 8, 0, Utc::now()).unwrap();
        slots::set_slot_time(&conn, &owner(), SlotKey::TwiceAm, 8, 0, Utc::now()).unwrap();
        slots::set_slot_time(&conn, &owner(), SlotKey::TwicePm, 20, 0, Utc::now()).unwrap();

        let clock = clock(6);
        let triggers = slots_for_today(&conn, &clock, &owner()).unwrap();
        let reminders = coalesce(&clock, &triggers).unwrap();
        assert_eq!(reminders.len(), 2);
        assert_eq!(reminders[0].message, "Time to take: A + B");
        assert_eq!(reminders[1].medication_names, vec!["B".to_string()]);
    }

    #[test]
    fn next_fire_rolls_to_tomorrow_once_passed() {
        let clock = clock(9);
        assert_eq!(
            next_fire(&clock, 20, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 1, 20, 0, 0).unwrap()
        );
        assert_eq!(
            next_fire(&clock, 8, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 2, 8, 0, 0).unwrap()
        );
        assert_eq!(
            next_fire(&clock, 9, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn sink_is_object_safe() {
        fn _assert(_: &dyn ReminderSink) {}
    }
}
