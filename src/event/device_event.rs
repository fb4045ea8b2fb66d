// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::capabilities::{Capability, FieldMap};

use super::{DeviceAddress, KeyEvent};

/// Connection status reported for a device.
///
/// Per connection attempt the order is `Connecting → Enabling → Connected`,
/// or `Connecting → Retrying → Connecting → …` while the device is
/// unreachable. `Disconnected` always precedes the `Connecting` of a
/// reconnect. There is no terminal failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionStatus {
    /// A connection attempt has started.
    Connecting,
    /// The attempt failed; another one follows after the backoff.
    Retrying,
    /// The link is open and capabilities are being enabled.
    Enabling,
    /// The device is ready for reads.
    Connected,
    /// The link was dropped ahead of a reconnect.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns true if the device is ready for reads.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One complete read cycle of a device.
///
/// Serializes with one nested field map per capability, keyed by the
/// capability name, alongside `sensor_tag_name`, `sensor_tag_address` and
/// `timestamp`:
///
/// ```json
/// {"IRtemperature": {"ambient_temp_degC": 22.1, "target_temp_degC": 30.0},
///  "sensor_tag_name": "Kitchen", "sensor_tag_address": "12:34:56:78:12:34",
///  "timestamp": "2024-01-01T12:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Display name of the device.
    pub name: String,
    /// Hardware address of the device.
    pub address: DeviceAddress,
    /// Labeled values per capability, in registry order.
    pub readings: Vec<(Capability, FieldMap)>,
    /// When the read cycle completed.
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Returns the field map of one capability.
    #[must_use]
    pub fn get(&self, capability: Capability) -> Option<&FieldMap> {
        self.readings
            .iter()
            .find_map(|(cap, fields)| (*cap == capability).then_some(fields))
    }
}

impl Serialize for SensorReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.readings.len() + 3))?;
        for (capability, fields) in &self.readings {
            map.serialize_entry(capability.name(), fields)?;
        }
        map.serialize_entry("sensor_tag_name", &self.name)?;
        map.serialize_entry("sensor_tag_address", &self.address)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

/// Events emitted by the connection manager.
///
/// There are three independent categories: connection status, sensor
/// readings and key presses. Device I/O errors are never emitted as such.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// Connection status of a device changed.
    Status {
        /// The new status.
        status: ConnectionStatus,
        /// Display name of the device.
        name: String,
        /// Hardware address of the device.
        address: DeviceAddress,
    },

    /// A read cycle completed.
    Sensors(SensorReading),

    /// A button notification arrived.
    Keypress {
        /// Hardware address of the device.
        address: DeviceAddress,
        /// The decoded event.
        #[serde(flatten)]
        event: KeyEvent,
    },
}

impl DeviceEvent {
    /// Returns the address of the device this event belongs to.
    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        match self {
            Self::Status { address, .. } | Self::Keypress { address, .. } => address,
            Self::Sensors(reading) => &reading.address,
        }
    }

    /// Returns the status if this is a status event.
    #[must_use]
    pub fn status(&self) -> Option<ConnectionStatus> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this is a status event.
    #[must_use]
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }

    /// Returns `true` if this is a sensor reading.
    #[must_use]
    pub fn is_sensors(&self) -> bool {
        matches!(self, Self::Sensors(_))
    }

    /// Returns `true` if this is a key press.
    #[must_use]
    pub fn is_keypress(&self) -> bool {
        matches!(self, Self::Keypress { .. })
    }

    /// Creates a status event.
    #[must_use]
    pub fn status_changed(
        status: ConnectionStatus,
        name: impl Into<String>,
        address: DeviceAddress,
    ) -> Self {
        Self::Status {
            status,
            name: name.into(),
            address,
        }
    }
}
