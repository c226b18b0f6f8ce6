use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::enums::SlotKey;
use crate::error::AdherenceError;

/// Markers the settings screen stores for a slot the user never set.
const UNSET_MARKERS: &[&str] = &["", "unset", "未设置"];

/// Time of day for one slot, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotTime {
    hour: u8,
    minute: u8,
}

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, AdherenceError> {
        if hour > 23 {
            return Err(AdherenceError::Validation(format!(
                "hour {hour} out of range 0-23"
            )));
        }
        if minute > 59 {
            return Err(AdherenceError::Validation(format!(
                "minute {minute} out of range 0-59"
            )));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    /// Parse `HH:MM`. Unset markers yield `None`.
    pub fn parse(text: &str) -> Result<Option<Self>, AdherenceError> {
        let trimmed = text.trim();
        if UNSET_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
            return Ok(None);
        }
        let (h, m) = trimmed
            .split_once(':')
            .ok_or_else(|| AdherenceError::Validation(format!("'{trimmed}' is not HH:MM")))?;
        let hour = h
            .trim()
            .parse::<u32>()
            .map_err(|_| AdherenceError::Validation(format!("bad hour in '{trimmed}'")))?;
        let minute = m
            .trim()
            .parse::<u32>()
            .map_err(|_| AdherenceError::Validation(format!("bad minute in '{trimmed}'")))?;
        Self::new(hour, minute).map(Some)
    }

    pub fn hour(&self) -> u32 {
        self.hour as u32
    }

    pub fn minute(&self) -> u32 {
        self.minute as u32
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl std::fmt::Display for SlotTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Slot configuration for one input row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSetting {
    pub slot_key: SlotKey,
    pub hour: u32,
    pub minute: u32,
}

/// All configured slots of one owner. Missing keys have no time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSchedule {
    times: BTreeMap<SlotKey, SlotTime>,
}

impl SlotSchedule {
    pub fn get(&self, key: SlotKey) -> Option<SlotTime> {
        self.times.get(&key).copied()
    }

    pub fn insert(&mut self, key: SlotKey, time: SlotTime) {
        self.times.insert(key, time);
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, SlotTime)> + '_ {
        self.times.iter().map(|(k, t)| (*k, *t))
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }
}

impl FromIterator<(SlotKey, SlotTime)> for SlotSchedule {
    fn from_iter<I: IntoIterator<Item = (SlotKey, SlotTime)>>(iter: I) -> Self {
        Self {
            times: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_times_are_rejected() {
        assert!(matches!(SlotTime::new(24, 0), Err(AdherenceError::Validation(_))));
        assert!(matches!(SlotTime::new(8, 60), Err(AdherenceError::Validation(_))));
        assert!(SlotTime::new(23, 59).is_ok());
    }

    #[test]
    fn parses_clock_text() {
        let t = SlotTime::parse("07:05").unwrap().unwrap();
        assert_eq!((t.hour(), t.minute()), (7, 5));
        assert_eq!(t.to_string(), "07:05");
    }

    #[test]
    fn unset_markers_mean_no_time() {
        assert_eq!(SlotTime::parse("未设置").unwrap(), None);
        assert_eq!(SlotTime::parse("  ").unwrap(), None);
        assert_eq!(SlotTime::parse("Unset").unwrap(), None);
    }

    #[test]
    fn garbage_is_a_validation_error() {
        assert!(SlotTime::parse("8 o'clock").is_err());
        assert!(SlotTime::parse("25:00").is_err());
    }

    #[test]
    fn schedule_lookup_misses_unconfigured_keys() {
        let schedule: SlotSchedule = [(SlotKey::ThriceAm, SlotTime::new(8, 0).unwrap())]
            .into_iter()
            .collect();
        assert!(schedule.get(SlotKey::ThriceAm).is_some());
        assert!(schedule.get(SlotKey::ThriceNoon).is_none());
    }
}
