use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{from_millis, to_millis};
use crate::db::DatabaseError;
use crate::models::OwnerId;

/// Last successful sync instant of `owner` for `stream`, if any.
pub fn get_sync_watermark(
    conn: &Connection,
    owner: &OwnerId,
    stream: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    let ms: Option<i64> = conn
        .query_row(
            "SELECT last_synced_at FROM sync_state WHERE owner_id = ?1 AND stream = ?2",
            params![owner.as_str(), stream],
            |row| row.get(0),
        )
        .optional()?;
    ms.map(from_millis).transpose()
}

pub fn set_sync_watermark(
    conn: &Connection,
    owner: &OwnerId,
    stream: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sync_state (owner_id, stream, last_synced_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (owner_id, stream) DO UPDATE SET last_synced_at = excluded.last_synced_at",
        params![owner.as_str(), stream, to_millis(at)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::TimeZone;

    #[test]
    fn watermark_round_trips_per_stream() {
        let conn = open_memory_database().unwrap();
        let owner = OwnerId::parse("u1").unwrap();
        assert!(get_sync_watermark(&conn, &owner, "intake").unwrap().is_none());

        let first = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 7, 2, 0, 0, 0).unwrap();
        set_sync_watermark(&conn, &owner, "intake", first).unwrap();
        set_sync_watermark(&conn, &owner, "intake", second).unwrap();

        assert_eq!(get_sync_watermark(&conn, &owner, "intake").unwrap(), Some(second));
        assert!(get_sync_watermark(&conn, &owner, "catalog").unwrap().is_none());
    }
}
