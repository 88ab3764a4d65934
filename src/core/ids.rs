//! Identifier Types
//!
//! Validated newtypes for device and beacon identifiers.
//! Both are operator/firmware-assigned strings, normalized to
//! uppercase at the parse boundary so lookups never miss on case.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced when parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Identifier length outside the allowed range.
    #[error("id must be {0}-{1} characters")]
    BadLength(usize, usize),

    /// Identifier contains a character outside the allow-list.
    #[error("id must be alphanumeric")]
    BadCharacter,
}

/// Stable tracker/device identifier.
///
/// Externally assigned, uppercase alphanumeric, 4-10 characters.
/// Implements `Ord` for deterministic `BTreeMap` ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Minimum identifier length.
    pub const MIN_LEN: usize = 4;
    /// Maximum identifier length.
    pub const MAX_LEN: usize = 10;

    /// Parse and normalize a raw identifier (trim + uppercase).
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let norm = raw.trim().to_ascii_uppercase();
        if norm.len() < Self::MIN_LEN || norm.len() > Self::MAX_LEN {
            return Err(IdError::BadLength(Self::MIN_LEN, Self::MAX_LEN));
        }
        if !norm.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdError::BadCharacter);
        }
        Ok(Self(norm))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four characters, used for fallback display names.
    pub fn suffix(&self) -> &str {
        &self.0[self.0.len() - 4..]
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Safe-zone beacon identifier.
///
/// Operator-assigned, uppercase alphanumeric, 2-16 characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeaconId(String);

impl BeaconId {
    /// Minimum identifier length.
    pub const MIN_LEN: usize = 2;
    /// Maximum identifier length.
    pub const MAX_LEN: usize = 16;

    /// Parse and normalize a raw identifier (trim + uppercase).
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let norm = raw.trim().to_ascii_uppercase();
        if norm.len() < Self::MIN_LEN || norm.len() > Self::MAX_LEN {
            return Err(IdError::BadLength(Self::MIN_LEN, Self::MAX_LEN));
        }
        if !norm.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdError::BadCharacter);
        }
        Ok(Self(norm))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_normalizes() {
        let id = DeviceId::parse("  t9ef0 ").unwrap();
        assert_eq!(id.as_str(), "T9EF0");
        assert_eq!(id.suffix(), "9EF0");
    }

    #[test]
    fn test_device_id_rejects_bad_input() {
        assert!(DeviceId::parse("T1").is_err());
        assert!(DeviceId::parse("TOOLONGFORSURE").is_err());
        assert!(DeviceId::parse("T12!4").is_err());
        assert!(DeviceId::parse("").is_err());
    }

    #[test]
    fn test_device_id_ordering() {
        let a = DeviceId::parse("AAAA").unwrap();
        let b = DeviceId::parse("BBBB").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_beacon_id_bounds() {
        assert!(BeaconId::parse("B1").is_ok());
        assert!(BeaconId::parse("B").is_err());
        assert!(BeaconId::parse("BASECAMPBEACON01X").is_err());
    }
}
