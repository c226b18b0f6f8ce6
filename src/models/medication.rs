use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{FrequencyPattern, MedicationStatus};
use super::owner::OwnerId;

/// Identity form of a medication name.
///
/// Intake history is keyed by this rather than by a catalog id, so editing
/// or re-creating a definition never orphans history. Renaming a medication
/// starts a new history under the new key; the old rows keep the old key.
pub fn medication_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Optional inclusive date bounds during which a medication is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ActiveWindow {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start.map_or(true, |s| day >= s) && self.end.map_or(true, |e| day <= e)
    }

    pub fn is_ordered(&self) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationDefinition {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub name: String,
    pub dosage_amount: String,
    pub dosage_unit: String,
    pub frequency: FrequencyPattern,
    pub active_window: ActiveWindow,
    pub status: MedicationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl MedicationDefinition {
    pub fn name_key(&self) -> String {
        medication_key(&self.name)
    }

    /// Dose as shown to the user and snapshotted onto intake rows.
    pub fn dosage_label(&self) -> String {
        match (self.dosage_amount.trim(), self.dosage_unit.trim()) {
            ("", "") => String::new(),
            (amount, "") => amount.to_string(),
            ("", unit) => unit.to_string(),
            (amount, unit) => format!("{amount} {unit}"),
        }
    }

    /// Scheduled for `day` as far as the current catalog state says.
    pub fn is_due_on(&self, day: NaiveDate) -> bool {
        self.status == MedicationStatus::Active
            && self.frequency.is_scheduled()
            && self.active_window.contains(day)
    }
}

/// One stretch during which a medication was inactive. `resumed_at` is
/// `None` while it still is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactivePeriod {
    pub medication_id: Uuid,
    pub paused_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl InactivePeriod {
    /// True when the medication was inactive for all of `[start, end)`.
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.paused_at <= start && self.resumed_at.map_or(true, |r| r >= end)
    }

    pub fn is_open(&self) -> bool {
        self.resumed_at.is_none()
    }
}

/// Catalog mutation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationInput {
    pub owner_id: String,
    pub name: String,
    pub frequency: FrequencyPattern,
    #[serde(default)]
    pub dosage_amount: String,
    #[serde(default)]
    pub dosage_unit: String,
    #[serde(default)]
    pub active_window: Option<ActiveWindow>,
    #[serde(default = "default_status")]
    pub status: MedicationStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_status() -> MedicationStatus {
    MedicationStatus::Active
}
