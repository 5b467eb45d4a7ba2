use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use healid_core::Label;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Patient identifier. Always a non-negative integer so that it can double
/// as the recognition model's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(u32);

impl PatientId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// The model label this patient trains under.
    pub const fn label(self) -> Label {
        self.0
    }

    pub const fn from_label(label: Label) -> Self {
        Self(label)
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientId {
    type Err = IdentityError;

    /// Accepts ASCII or full-width digits with surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.trim().chars().map(half_width_digit).collect();
        if normalized.is_empty() || !normalized.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::InvalidPatientId(s.to_string()));
        }
        normalized
            .parse()
            .map(Self)
            .map_err(|_| IdentityError::InvalidPatientId(s.to_string()))
    }
}

fn half_width_digit(c: char) -> char {
    match c {
        '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
        other => other,
    }
}

/// Local metadata for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub last_updated: DateTime<Utc>,
    /// Label in the current model; `None` if never trained or invalidated.
    pub label: Option<Label>,
    /// Sequence number the next enrolled face sample will get.
    pub next_sample_seq: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ascii() {
        assert_eq!("42".parse::<PatientId>().unwrap(), PatientId::new(42));
        assert_eq!("  7 \n".parse::<PatientId>().unwrap(), PatientId::new(7));
    }

    #[test]
    fn test_parse_full_width_digits() {
        assert_eq!("１２３".parse::<PatientId>().unwrap(), PatientId::new(123));
        assert_eq!(" ４5 ".parse::<PatientId>().unwrap(), PatientId::new(45));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        for bad in ["", "   ", "-3", "12a", "Unknown", "99999999999"] {
            assert!(
                matches!(bad.parse::<PatientId>(), Err(IdentityError::InvalidPatientId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_label_is_identity() {
        let id = PatientId::new(5);
        assert_eq!(PatientId::from_label(id.label()), id);
    }
}
