// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware address of a managed tag.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Stable hardware identifier of a device, e.g. `12:34:56:78:9A:BC`.
///
/// Addresses are validated on construction and normalized to uppercase so
/// that `aa:bb:...` and `AA:BB:...` key the same device. Cloning is cheap.
///
/// # Examples
///
/// ```
/// use tagfleet::DeviceAddress;
///
/// let addr: DeviceAddress = "b0:b4:48:c9:2a:01".parse().unwrap();
/// assert_eq!(addr.as_str(), "B0:B4:48:C9:2A:01");
///
/// assert!("not-an-address".parse::<DeviceAddress>().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(Arc<str>);

impl DeviceAddress {
    /// Parses and normalizes an address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] unless the input is six
    /// colon-separated pairs of hex digits.
    pub fn new(address: &str) -> Result<Self, ConfigError> {
        let trimmed = address.trim();
        let octets: Vec<&str> = trimmed.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

        if !valid {
            return Err(ConfigError::InvalidAddress(address.to_string()));
        }

        Ok(Self(Arc::from(trimmed.to_ascii_uppercase())))
    }

    /// Returns the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceAddress({})", self.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        let lower = DeviceAddress::new("b0:b4:48:c9:2a:01").unwrap();
        let upper = DeviceAddress::new("B0:B4:48:C9:2A:01").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.to_string(), "B0:B4:48:C9:2A:01");
    }

    #[test]
    fn trims_whitespace() {
        let addr = DeviceAddress::new(" 12:34:56:78:12:34\n").unwrap();
        assert_eq!(addr.as_str(), "12:34:56:78:12:34");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "12:34:56:78:12", "12:34:56:78:12:34:56", "12-34-56-78-12-34", "1G:34:56:78:12:34", "123:4:56:78:12:34"] {
            assert!(
                matches!(DeviceAddress::new(bad), Err(ConfigError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_format() {
        let addr = DeviceAddress::new("12:34:56:78:12:34").unwrap();
        assert_eq!(format!("{addr:?}"), "DeviceAddress(12:34:56:78:12:34)");
    }

    #[test]
    fn deserialize_validates() {
        let ok: DeviceAddress = serde_json::from_str(r#""aa:bb:cc:dd:ee:ff""#).unwrap();
        assert_eq!(ok.as_str(), "AA:BB:CC:DD:EE:FF");

        assert!(serde_json::from_str::<DeviceAddress>(r#""nope""#).is_err());
    }
}
