use serde::{Deserialize, Serialize};

use crate::error::AdherenceError;

/// Placeholder ids older clients wrote before a signed-in user existed.
/// They never identify a real owner.
pub const SENTINEL_OWNER_IDS: &[&str] = &["0", "000000"];

/// A resolved owner identity. Never blank, never a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn parse(raw: &str) -> Result<Self, AdherenceError> {
        let trimmed = raw.trim();
        if is_unowned(Some(trimmed)) {
            return Err(AdherenceError::Ownership(format!(
                "'{trimmed}' is not a usable owner id"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// True for a missing, blank, or placeholder owner column.
pub fn is_unowned(owner: Option<&str>) -> bool {
    match owner.map(str::trim) {
        None => true,
        Some(s) => s.is_empty() || SENTINEL_OWNER_IDS.contains(&s),
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = AdherenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self {
        owner.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_placeholder_ids_are_rejected() {
        for raw in ["", "   ", "0", "000000"] {
            let err = OwnerId::parse(raw).unwrap_err();
            assert!(matches!(err, AdherenceError::Ownership(_)), "{raw:?}");
        }
    }

    #[test]
    fn owner_ids_are_trimmed() {
        let owner = OwnerId::parse("  user-42 ").unwrap();
        assert_eq!(owner.as_str(), "user-42");
    }

    #[test]
    fn unowned_detection_covers_null() {
        assert!(is_unowned(None));
        assert!(is_unowned(Some("0")));
        assert!(!is_unowned(Some("user-1")));
    }

    #[test]
    fn deserializing_a_placeholder_fails() {
        assert!(serde_json::from_str::<OwnerId>("\"000000\"").is_err());
        let owner: OwnerId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(owner.as_str(), "u1");
    }
}
