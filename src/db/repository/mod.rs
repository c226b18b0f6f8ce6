//! Repository layer: table-scoped database operations.
//!
//! Free functions over `&Connection` so callers compose them inside a
//! transaction of their choosing. Instants are stored as epoch milliseconds,
//! calendar dates as `%Y-%m-%d` text.

mod intake;
mod medication;
mod slot_time;
mod sync_state;

use chrono::{DateTime, NaiveDate, Utc};

use super::DatabaseError;

pub use intake::*;
pub use medication::*;
pub use slot_time::*;
pub use sync_state::*;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DatabaseError::ConstraintViolation(format!("timestamp {ms} out of range")))
}

fn date_to_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn date_from_text(text: Option<String>, field: &str) -> Result<Option<NaiveDate>, DatabaseError> {
    match text {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Some)
            .map_err(|_| DatabaseError::InvalidEnum {
                field: field.into(),
                value: s,
            }),
    }
}
