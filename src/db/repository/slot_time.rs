use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::to_millis;
use crate::db::DatabaseError;
use crate::models::enums::SlotKey;
use crate::models::*;

pub fn upsert_slot_time(
    conn: &Connection,
    owner: &OwnerId,
    key: SlotKey,
    time: SlotTime,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO slot_times (owner_id, slot_key, hour, minute, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (owner_id, slot_key)
         DO UPDATE SET hour = excluded.hour, minute = excluded.minute, updated_at = excluded.updated_at",
        params![owner.as_str(), key.as_str(), time.hour(), time.minute(), to_millis(now)],
    )?;
    Ok(())
}

pub fn delete_slot_time(conn: &Connection, owner: &OwnerId, key: SlotKey) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM slot_times WHERE owner_id = ?1 AND slot_key = ?2",
        params![owner.as_str(), key.as_str()],
    )?;
    Ok(changed > 0)
}

/// Every configured slot of `owner`. Rows with an unknown key or an
/// impossible time are skipped and logged.
pub fn load_slot_schedule(conn: &Connection, owner: &OwnerId) -> Result<SlotSchedule, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT slot_key, hour, minute FROM slot_times WHERE owner_id = ?1",
    )?;
    let rows = stmt.query_map(params![owner.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, u32>(2)?,
        ))
    })?;

    let mut schedule = SlotSchedule::default();
    for row in rows {
        let (key, hour, minute) = row?;
        let parsed = SlotKey::from_str(&key)
            .ok()
            .and_then(|k| SlotTime::new(hour, minute).ok().map(|t| (k, t)));
        match parsed {
            Some((k, t)) => schedule.insert(k, t),
            None => tracing::warn!(owner = %owner, slot_key = %key, hour, minute, "Ignoring unusable slot row"),
        }
    }
    Ok(schedule)
}
