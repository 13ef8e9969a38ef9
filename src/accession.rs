//! Accession numbers
//!
//! A submission is keyed by an accession number: 18 digits, written either
//! undashed (`000095012309012345`) or dashed (`0000950123-09-012345`).
//! Numeric forms with the leading zeros dropped are also accepted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Width of the undashed form
pub const ACCESSION_WIDTH: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessionError {
    #[error("Empty accession number")]
    Empty,

    #[error("Invalid character in accession number: {0}")]
    InvalidCharacter(String),

    #[error("Accession number wider than {ACCESSION_WIDTH} digits: {0}")]
    TooWide(String),
}

/// A normalized accession number (always stored as 18 digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Accession(String);

impl Accession {
    /// Parse any accepted form
    pub fn parse(input: &str) -> Result<Self, AccessionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AccessionError::Empty);
        }

        let digits: String = trimmed.chars().filter(|c| *c != '-').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(AccessionError::InvalidCharacter(trimmed.to_string()));
        }
        if digits.is_empty() {
            return Err(AccessionError::Empty);
        }

        let significant = digits.trim_start_matches('0');
        if significant.len() > ACCESSION_WIDTH {
            return Err(AccessionError::TooWide(trimmed.to_string()));
        }

        Ok(Self(format!("{:0>width$}", significant, width = ACCESSION_WIDTH)))
    }

    /// The 18-digit undashed form, used for directory names and archive members
    pub fn no_dash(&self) -> &str {
        &self.0
    }

    /// The dashed `##########-##-######` form
    pub fn dashed(&self) -> String {
        format!("{}-{}-{}", &self.0[..10], &self.0[10..12], &self.0[12..])
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Accession {
    type Err = AccessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for Accession {
    fn from(value: u64) -> Self {
        // u64::MAX has 20 digits but every real accession fits in 18.
        Self(format!("{:0>width$}", value, width = ACCESSION_WIDTH))
    }
}

impl Serialize for Accession {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Accession {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Accession::parse(&raw).map_err(serde::de::Error::custom)
    }
}
