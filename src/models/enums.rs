use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(FrequencyPattern {
    OnceDaily => "once_daily",
    TwiceDaily => "twice_daily",
    ThriceDaily => "thrice_daily",
    AsNeeded => "as_needed",
});

str_enum!(MedicationStatus {
    Active => "active",
    Inactive => "inactive",
});

str_enum!(IntakeStatus {
    Planned => "planned",
    Taken => "taken",
});

str_enum!(SlotKey {
    Once => "once",
    TwiceAm => "twice_am",
    TwicePm => "twice_pm",
    ThriceAm => "thrice_am",
    ThriceNoon => "thrice_noon",
    ThricePm => "thrice_pm",
});

str_enum!(TimeGroup {
    Morning => "morning",
    Noon => "noon",
    Evening => "evening",
});

str_enum!(DayStatus {
    NoStatus => "no_status",
    FullyTaken => "fully_taken",
    IncompletePast => "incomplete_past",
});

impl FrequencyPattern {
    /// Daily slots this pattern occupies, in dosing order.
    pub fn slot_keys(&self) -> &'static [SlotKey] {
        match self {
            Self::OnceDaily => &[SlotKey::Once],
            Self::TwiceDaily => &[SlotKey::TwiceAm, SlotKey::TwicePm],
            Self::ThriceDaily => &[SlotKey::ThriceAm, SlotKey::ThriceNoon, SlotKey::ThricePm],
            Self::AsNeeded => &[],
        }
    }

    /// Whether the pattern produces automatic daily doses.
    pub fn is_scheduled(&self) -> bool {
        !self.slot_keys().is_empty()
    }

    /// Parse a free-text frequency label as users and prescriptions write them.
    ///
    /// Accepts the canonical keys ("twice_daily"), English phrasing
    /// ("twice a day", "3x daily", "once per day"), Latin abbreviations
    /// (qd, bid, tid, prn) and the Chinese labels ("每日一次", "每日2次").
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if let Ok(canonical) = normalized.parse::<Self>() {
            return Some(canonical);
        }

        match normalized.as_str() {
            "qd" | "od" | "daily" | "once" => return Some(Self::OnceDaily),
            "bid" | "b.i.d." => return Some(Self::TwiceDaily),
            "tid" | "t.i.d." => return Some(Self::ThriceDaily),
            "prn" | "p.r.n." | "as needed" | "when needed" | "按需" | "必要时" => {
                return Some(Self::AsNeeded)
            }
            _ => {}
        }

        let caps = LABEL_PATTERN.captures(&normalized)?;
        let count = caps.name("zh").or_else(|| caps.name("en"))?.as_str();
        match count {
            "1" | "one" | "once" | "一" => Some(Self::OnceDaily),
            "2" | "two" | "twice" | "两" | "二" => Some(Self::TwiceDaily),
            "3" | "three" | "thrice" | "三" => Some(Self::ThriceDaily),
            _ => None,
        }
    }
}

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:每日|每天)(?P<zh>[一二两三123])次$|^(?P<en>once|twice|thrice|one|two|three|[123])\s*(?:x|times?)?\s*(?:a|per|/)?\s*(?:day|daily)$",
    )
    .unwrap()
});

impl SlotKey {
    pub const ALL: [SlotKey; 6] = [
        SlotKey::Once,
        SlotKey::TwiceAm,
        SlotKey::TwicePm,
        SlotKey::ThriceAm,
        SlotKey::ThriceNoon,
        SlotKey::ThricePm,
    ];

    pub fn time_group(&self) -> TimeGroup {
        match self {
            Self::Once | Self::TwiceAm | Self::ThriceAm => TimeGroup::Morning,
            Self::ThriceNoon => TimeGroup::Noon,
            Self::TwicePm | Self::ThricePm => TimeGroup::Evening,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enums_round_trip_through_storage_strings() {
        for key in SlotKey::ALL {
            assert_eq!(SlotKey::from_str(key.as_str()).unwrap(), key);
        }
        assert_eq!(IntakeStatus::from_str("taken").unwrap(), IntakeStatus::Taken);
        assert!(MedicationStatus::from_str("completed").is_err());
    }

    #[test]
    fn frequency_maps_to_ordered_slots() {
        assert_eq!(FrequencyPattern::OnceDaily.slot_keys(), &[SlotKey::Once]);
        assert_eq!(
            FrequencyPattern::ThriceDaily.slot_keys(),
            &[SlotKey::ThriceAm, SlotKey::ThriceNoon, SlotKey::ThricePm]
        );
        assert!(FrequencyPattern::AsNeeded.slot_keys().is_empty());
        assert!(!FrequencyPattern::AsNeeded.is_scheduled());
    }

    #[test]
    fn frequency_labels_parse() {
        assert_eq!(FrequencyPattern::from_label("每日一次"), Some(FrequencyPattern::OnceDaily));
        assert_eq!(FrequencyPattern::from_label("每日2次"), Some(FrequencyPattern::TwiceDaily));
        assert_eq!(FrequencyPattern::from_label("每日三次"), Some(FrequencyPattern::ThriceDaily));
        assert_eq!(FrequencyPattern::from_label("Twice a day"), Some(FrequencyPattern::TwiceDaily));
        assert_eq!(FrequencyPattern::from_label("3x daily"), Some(FrequencyPattern::ThriceDaily));
        assert_eq!(FrequencyPattern::from_label("once per day"), Some(FrequencyPattern::OnceDaily));
        assert_eq!(FrequencyPattern::from_label("BID"), Some(FrequencyPattern::TwiceDaily));
        assert_eq!(FrequencyPattern::from_label("prn"), Some(FrequencyPattern::AsNeeded));
        assert_eq!(FrequencyPattern::from_label("thrice_daily"), Some(FrequencyPattern::ThriceDaily));
    }

    #[test]
    fn unknown_frequency_labels_are_rejected() {
        assert_eq!(FrequencyPattern::from_label(""), None);
        assert_eq!(FrequencyPattern::from_label("every other week"), None);
        assert_eq!(FrequencyPattern::from_label("每日五次"), None);
    }

    #[test]
    fn slot_keys_belong_to_time_groups() {
        assert_eq!(SlotKey::Once.time_group(), TimeGroup::Morning);
        assert_eq!(SlotKey::ThriceNoon.time_group(), TimeGroup::Noon);
        assert_eq!(SlotKey::TwicePm.time_group(), TimeGroup::Evening);
    }

    #[test]
    fn day_status_serializes_snake_case() {
        let json = serde_json::to_string(&DayStatus::IncompletePast).unwrap();
        assert_eq!(json, "\"incomplete_past\"");
    }
}
