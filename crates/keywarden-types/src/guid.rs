//! piv token guid type.
//!
//! hardware tokens are identified by a 32-hex-digit guid (the yubikey
//! serial-derived identifier). guids are normalized to uppercase so the
//! same token always maps to the same storage key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::Error;

/// length of a guid in hex digits.
pub const GUID_LEN: usize = 32;

/// a piv token guid - 32 uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(String);

impl Guid {
    /// get the guid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != GUID_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidGuid(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Guid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_guid() {
        let guid: Guid = "97496DD1C8F053DE7450CD854D9C95B4".parse().unwrap();
        assert_eq!(guid.as_str(), "97496DD1C8F053DE7450CD854D9C95B4");
    }

    #[test]
    fn test_guid_normalized_to_uppercase() {
        let guid: Guid = "97496dd1c8f053de7450cd854d9c95b4".parse().unwrap();
        assert_eq!(guid.as_str(), "97496DD1C8F053DE7450CD854D9C95B4");
    }

    #[test]
    fn test_invalid_guids() {
        assert!("".parse::<Guid>().is_err());
        assert!("97496DD1".parse::<Guid>().is_err()); // too short
        assert!("97496DD1C8F053DE7450CD854D9C95B4FF".parse::<Guid>().is_err()); // too long
        assert!("97496DD1C8F053DE7450CD854D9C95BZ".parse::<Guid>().is_err()); // non-hex
    }

    #[test]
    fn test_guid_serde_round_trip() {
        let guid: Guid = "97496DD1C8F053DE7450CD854D9C95B4".parse().unwrap();
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, "\"97496DD1C8F053DE7450CD854D9C95B4\"");
        let back: Guid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guid);
    }
}
