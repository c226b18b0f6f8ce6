//! Per-owner daily slot times.
//!
//! A slot with no configured time produces no dose and no reminder. There is
//! no fallback time.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::{self, begin_write};
use crate::error::AdherenceError;
use crate::models::enums::SlotKey;
use crate::models::*;

pub fn set_slot_time(
    conn: &Connection,
    owner: &OwnerId,
    key: SlotKey,
    hour: u32,
    minute: u32,
    now: DateTime<Utc>,
) -> Result<SlotTime, AdherenceError> {
    let time = SlotTime::new(hour, minute)?;
    db::upsert_slot_time(conn, owner, key, time, now)?;
    tracing::debug!(owner = %owner, slot = %key, time = %time, "Slot time set");
    Ok(time)
}

/// Set a slot from `HH:MM` text. Unset markers clear the slot.
pub fn set_slot_text(
    conn: &Connection,
    owner: &OwnerId,
    key: SlotKey,
    text: &str,
    now: DateTime<Utc>,
) -> Result<Option<SlotTime>, AdherenceError> {
    match SlotTime::parse(text)? {
        Some(time) => {
            db::upsert_slot_time(conn, owner, key, time, now)?;
            Ok(Some(time))
        }
        None => {
            clear_slot(conn, owner, key)?;
            Ok(None)
        }
    }
}

pub fn clear_slot(conn: &Connection, owner: &OwnerId, key: SlotKey) -> Result<bool, AdherenceError> {
    Ok(db::delete_slot_time(conn, owner, key)?)
}

/// Apply several slot settings atomically. Every entry is validated before
/// anything is written.
pub fn apply_slot_settings(
    conn: &Connection,
    owner: &OwnerId,
    settings: &[SlotSetting],
    now: DateTime<Utc>,
) -> Result<SlotSchedule, AdherenceError> {
    let validated = settings
        .iter()
        .map(|s| SlotTime::new(s.hour, s.minute).map(|t| (s.slot_key, t)))
        .collect::<Result<Vec<_>, _>>()?;

    let tx = begin_write(conn)?;
    for (key, time) in &validated {
        db::upsert_slot_time(&tx, owner, *key, *time, now)?;
    }
    let schedule = db::load_slot_schedule(&tx, owner)?;
    tx.commit()?;
    Ok(schedule)
}

pub fn load_schedule(conn: &Connection, owner: &OwnerId) -> Result<SlotSchedule, AdherenceError> {
    Ok(db::load_slot_schedule(conn, owner)?)
}
