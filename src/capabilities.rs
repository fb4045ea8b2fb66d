// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability registry and enabled-capability sets.
//!
//! Every sensing or interaction feature of a tag is a [`Capability`]. Each
//! capability declares a fixed, ordered list of output fields; a raw read
//! is labeled purely by position against that list.
//!
//! The registry order is the declaration order of [`Capability::ALL`]. It
//! is the order in which capabilities are enabled after connecting and the
//! order in which they are read.
//!
//! # Examples
//!
//! ```
//! use tagfleet::{Capability, CapabilitySet};
//!
//! let set = CapabilitySet::new()
//!     .with(Capability::Humidity)
//!     .with(Capability::IrTemperature);
//!
//! // Iteration follows registry order, not insertion order
//! let order: Vec<_> = set.iter().collect();
//! assert_eq!(order, [Capability::IrTemperature, Capability::Humidity]);
//!
//! let fields = Capability::Humidity.label(&[21.5, 40.0]).unwrap();
//! assert_eq!(fields.get("relative_humidity"), Some(40.0));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, Error};

/// A named capability of a sensor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Infrared thermopile (ambient and target temperature).
    IrTemperature,
    /// Three-axis accelerometer.
    Accelerometer,
    /// Humidity sensor with its own ambient temperature.
    Humidity,
    /// Three-axis magnetometer.
    Magnetometer,
    /// Barometric pressure sensor with its own ambient temperature.
    Barometer,
    /// Three-axis gyroscope.
    Gyroscope,
    /// Side buttons. Delivers notifications instead of being read.
    Keypress,
}

impl Capability {
    /// All capabilities in registry order.
    pub const ALL: [Self; 7] = [
        Self::IrTemperature,
        Self::Accelerometer,
        Self::Humidity,
        Self::Magnetometer,
        Self::Barometer,
        Self::Gyroscope,
        Self::Keypress,
    ];

    /// Returns the configuration name of the capability.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IrTemperature => "IRtemperature",
            Self::Accelerometer => "accelerometer",
            Self::Humidity => "humidity",
            Self::Magnetometer => "magnetometer",
            Self::Barometer => "barometer",
            Self::Gyroscope => "gyroscope",
            Self::Keypress => "keypress",
        }
    }

    /// Returns the ordered field names produced when this capability is read.
    ///
    /// Notifying capabilities are never read and declare no fields.
    #[must_use]
    pub const fn fields(self) -> &'static [&'static str] {
        match self {
            Self::IrTemperature => &["ambient_temp_degC", "target_temp_degC"],
            Self::Accelerometer => &["x_accel_g", "y_accel_g", "z_accel_g"],
            Self::Humidity => &["ambient_temp_degC", "relative_humidity"],
            Self::Magnetometer => &["x_uT", "y_uT", "z_uT"],
            Self::Barometer => &["ambient_temp_degC", "pressure_millibars"],
            Self::Gyroscope => &["x_deg_per_sec", "y_deg_per_sec", "z_deg_per_sec"],
            Self::Keypress => &[],
        }
    }

    /// Returns true if the capability pushes notifications instead of being read.
    #[must_use]
    pub const fn is_notifying(self) -> bool {
        matches!(self, Self::Keypress)
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Labels raw positional values with this capability's field names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldCount`] if the number of values differs from
    /// the number of declared fields.
    pub fn label(self, raw: &[f64]) -> Result<FieldMap, Error> {
        let fields = self.fields();
        if raw.len() != fields.len() {
            return Err(Error::FieldCount {
                capability: self,
                expected: fields.len(),
                actual: raw.len(),
            });
        }

        Ok(FieldMap(fields.iter().copied().zip(raw.iter().copied()).collect()))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.name() == s)
            .ok_or_else(|| ConfigError::UnknownCapability(s.to_string()))
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(D::Error::custom)
    }
}

/// Labeled values of one capability read, in schema order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap(Vec<(&'static str, f64)>);

impl FieldMap {
    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<f64> {
        self.0
            .iter()
            .find_map(|(name, value)| (*name == field).then_some(*value))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(field, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.0.iter().copied()
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().copied())
    }
}

/// Set of capabilities enabled for one device.
///
/// In configuration files the set is written as a map of capability name to
/// flag, e.g. `{"IRtemperature": true, "keypress": true}`. Unknown names are
/// rejected. The default set enables only [`Capability::IrTemperature`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a set with every capability enabled.
    #[must_use]
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Returns the set with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns the set with `capability` removed.
    #[must_use]
    pub const fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    /// Returns true if `capability` is enabled.
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Returns true if no capability is enabled.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if a notifying capability is enabled.
    #[must_use]
    pub fn has_notifying(self) -> bool {
        self.iter().any(Capability::is_notifying)
    }

    /// Iterates over enabled capabilities in registry order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.contains(*cap))
    }

    /// Iterates over enabled capabilities that are read, in registry order.
    pub fn readable(self) -> impl Iterator<Item = Capability> {
        self.iter().filter(|cap| !cap.is_notifying())
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::new().with(Capability::IrTemperature)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::with)
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            Capability::ALL
                .into_iter()
                .map(|cap| (cap.name(), self.contains(cap))),
        )
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Flags not mentioned keep their default (IRtemperature on, rest off)
        let flags = BTreeMap::<Capability, bool>::deserialize(deserializer)?;
        Ok(flags
            .into_iter()
            .fold(Self::default(), |set, (cap, enabled)| {
                if enabled {
                    set.with(cap)
                } else {
                    set.without(cap)
                }
            }))
    }
}
