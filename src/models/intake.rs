use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::IntakeStatus;
use super::medication::medication_key;
use super::owner::OwnerId;

/// The (owner, medication, planned instant) triple naming one dosing event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub owner_id: OwnerId,
    pub medication_key: String,
    pub planned_at: DateTime<Utc>,
}

impl NaturalKey {
    pub fn new(owner_id: OwnerId, medication_name: &str, planned_at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            medication_key: medication_key(medication_name),
            planned_at,
        }
    }
}

/// One concrete dosing event in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeInstance {
    pub id: Uuid,
    pub owner_id: String,
    pub medication_name: String,
    pub medication_key: String,
    pub planned_at: DateTime<Utc>,
    pub actual_at: Option<DateTime<Utc>>,
    pub status: IntakeStatus,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntakeInstance {
    pub fn is_taken(&self) -> bool {
        self.status == IntakeStatus::Taken
    }

    /// Taken within `window` of the planned instant, either side.
    pub fn is_on_time(&self, window: Duration) -> bool {
        match (self.status, self.actual_at) {
            (IntakeStatus::Taken, Some(actual)) => (actual - self.planned_at).abs() <= window,
            _ => false,
        }
    }
}

/// A dose the expander wants present in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedEntry {
    pub owner_id: OwnerId,
    pub medication_name: String,
    pub planned_at: DateTime<Utc>,
    pub dosage: Option<String>,
    pub notes: Option<String>,
}
