//! Sync import/export of intake records.
//!
//! Transport is someone else's job: this module parses owner-tagged records,
//! merges them through the natural key, and renders the local window for
//! upload. Merge is last-writer-wins on the record timestamp.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{self, begin_write};
use crate::error::AdherenceError;
use crate::ledger;
use crate::models::enums::IntakeStatus;
use crate::models::*;

/// Watermark stream name for intake records.
pub const INTAKE_STREAM: &str = "intake";

/// One intake record in the wire shape. Instants are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    #[serde(default)]
    pub owner_user_id: Option<String>,
    pub medication_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub planned_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub actual_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dosage: Option<String>,
    pub taken: bool,
    #[serde(default)]
    pub notes: Option<String>,
    /// Last edit on the sending side. Falls back to `actual_time`.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.actual_time)
    }

    fn from_instance(record: &IntakeInstance) -> Self {
        Self {
            owner_user_id: Some(record.owner_id.clone()),
            medication_name: record.medication_name.clone(),
            planned_time: record.planned_at,
            actual_time: record.actual_at,
            dosage: record.dosage.clone(),
            taken: record.is_taken(),
            notes: record.notes.clone(),
            updated_at: Some(record.updated_at),
        }
    }
}

/// Either a bare array or the envelope the upload endpoint returns.
#[derive(Deserialize)]
#[serde(untagged)]
enum SyncPayload {
    Records(Vec<SyncRecord>),
    #[serde(rename_all = "camelCase")]
    Envelope {
        #[serde(default)]
        intake_records: Vec<SyncRecord>,
    },
}

pub fn parse_records(json: &str) -> Result<Vec<SyncRecord>, AdherenceError> {
    Ok(match serde_json::from_str::<SyncPayload>(json)? {
        SyncPayload::Records(records) => records,
        SyncPayload::Envelope { intake_records } => intake_records,
    })
}

pub fn render_records(records: &[SyncRecord]) -> Result<String, AdherenceError> {
    Ok(serde_json::to_string(records)?)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

enum Merge {
    Inserted,
    Updated,
    Unchanged,
}

/// Decide whether `incoming` should replace the state of `local`.
fn incoming_wins(local: &IntakeInstance, incoming: &SyncRecord) -> bool {
    let ts = incoming.timestamp();
    match (local.status, incoming.taken) {
        // A downgrade needs positive evidence that it happened later.
        (IntakeStatus::Taken, false) => ts.is_some_and(|t| t > local.updated_at),
        // A planned row nobody has touched since it was created carries no
        // competing decision.
        (IntakeStatus::Planned, true) => {
            local.updated_at == local.created_at || ts.map_or(true, |t| t >= local.updated_at)
        }
        (IntakeStatus::Taken, true) => {
            local.actual_at != incoming.actual_time && ts.is_some_and(|t| t > local.updated_at)
        }
        (IntakeStatus::Planned, false) => false,
    }
}

fn merge_one(conn: &Connection, owner: &OwnerId, record: &SyncRecord, now: DateTime<Utc>) -> Result<Merge, AdherenceError> {
    let key = NaturalKey::new(owner.clone(), &record.medication_name, record.planned_time);
    let status = if record.taken { IntakeStatus::Taken } else { IntakeStatus::Planned };
    let actual_at = if record.taken {
        Some(record.actual_time.unwrap_or(record.planned_time))
    } else {
        None
    };
    let stamped = record.timestamp().unwrap_or(now);

    let tx = begin_write(conn)?;
    let merge = match db::get_intake_by_key(&tx, &key)? {
        None => {
            let instance = IntakeInstance {
                id: Uuid::new_v4(),
                owner_id: owner.as_str().to_string(),
                medication_name: record.medication_name.trim().to_string(),
                medication_key: key.medication_key.clone(),
                planned_at: record.planned_time,
                actual_at,
                status,
                dosage: record.dosage.clone(),
                notes: record.notes.clone(),
                created_at: now,
                updated_at: stamped,
            };
            if db::insert_intake_if_absent(&tx, &instance)? {
                Merge::Inserted
            } else {
                Merge::Unchanged
            }
        }
        Some(local) if incoming_wins(&local, record) => {
            let merged = IntakeInstance {
                status,
                actual_at,
                dosage: record.dosage.clone().or(local.dosage.clone()),
                notes: record.notes.clone().or(local.notes.clone()),
                updated_at: stamped,
                ..local
            };
            db::overwrite_intake_state(&tx, &merged)?;
            Merge::Updated
        }
        Some(_) => Merge::Unchanged,
    };
    tx.commit()?;
    Ok(merge)
}

/// Merge a batch of owner-tagged records into the ledger.
///
/// Records with no usable owner or an empty medication name are skipped.
/// Each record commits on its own so the write lock is never held for the
/// whole batch.
pub fn import_records(
    conn: &Connection,
    records: &[SyncRecord],
    now: DateTime<Utc>,
) -> Result<SyncOutcome, AdherenceError> {
    let mut outcome = SyncOutcome::default();
    for record in records {
        let owner = match record.owner_user_id.as_deref().map(OwnerId::parse) {
            Some(Ok(owner)) => owner,
            _ => {
                tracing::warn!(medication = %record.medication_name, "Skipping sync record without owner");
                outcome.skipped += 1;
                continue;
            }
        };
        if record.medication_name.trim().is_empty() {
            tracing::warn!(owner = %owner, "Skipping sync record without medication name");
            outcome.skipped += 1;
            continue;
        }
        match merge_one(conn, &owner, record, now)? {
            Merge::Inserted => outcome.inserted += 1,
            Merge::Updated => outcome.updated += 1,
            Merge::Unchanged => outcome.skipped += 1,
        }
    }
    tracing::info!(
        inserted = outcome.inserted,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "Imported sync records"
    );
    Ok(outcome)
}

/// The owner's records of the last `days` local days, in the wire shape.
pub fn export_window(
    conn: &Connection,
    clock: &dyn Clock,
    owner: &OwnerId,
    days: u32,
) -> Result<Vec<SyncRecord>, AdherenceError> {
    Ok(ledger::find_recent(conn, clock, owner, days)?
        .iter()
        .map(SyncRecord::from_instance)
        .collect())
}

pub fn last_synced(
    conn: &Connection,
    owner: &OwnerId,
    stream: &str,
) -> Result<Option<DateTime<Utc>>, AdherenceError> {
    Ok(db::get_sync_watermark(conn, owner, stream)?)
}

pub fn mark_synced(
    conn: &Connection,
    owner: &OwnerId,
    stream: &str,
    at: DateTime<Utc>,
) -> Result<(), AdherenceError> {
    db::set_sync_watermark(conn, owner, stream, at)?;
    tracing::debug!(owner = %owner, stream, at = %at, "Sync watermark advanced");
    Ok(())
}
