// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration, the configuration store and manager settings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::{Capability, CapabilitySet};
use crate::error::ConfigError;
use crate::event::{DEFAULT_CHANNEL_CAPACITY, DeviceAddress};

/// Display name used when a configuration entry does not set one.
pub const DEFAULT_DEVICE_NAME: &str = "SensorTag";

fn default_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

/// Configuration of one managed tag.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tagfleet::{Capability, DeviceAddress, DeviceConfig};
///
/// let address = DeviceAddress::new("12:34:56:78:12:34").unwrap();
/// let config = DeviceConfig::new(address)
///     .with_name("Greenhouse")
///     .with_capability(Capability::Humidity)
///     .with_read_interval(Duration::from_secs(10));
///
/// assert!(config.capabilities.contains(Capability::IrTemperature));
/// assert!(config.capabilities.contains(Capability::Humidity));
/// ```
///
/// The JSON form uses the field names of the external configuration:
///
/// ```
/// use tagfleet::DeviceConfig;
///
/// let config: DeviceConfig = serde_json::from_str(r#"{
///     "address": "12:34:56:78:12:34",
///     "name": "Door",
///     "read_interval": 2.5,
///     "sensors": {"keypress": true, "IRtemperature": false}
/// }"#).unwrap();
///
/// assert_eq!(config.name, "Door");
/// assert!(config.capabilities.has_notifying());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware address; unique key of the device.
    pub address: DeviceAddress,
    /// Human readable name, reported in every event.
    #[serde(default = "default_name")]
    pub name: String,
    /// Enabled capabilities.
    #[serde(default, rename = "sensors")]
    pub capabilities: CapabilitySet,
    /// Interval for scheduled reads started by
    /// [`ConnectionManager::start`](super::ConnectionManager::start).
    #[serde(
        default,
        with = "interval_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub read_interval: Option<Duration>,
}

impl DeviceConfig {
    /// Creates a configuration with the default name and capability set.
    #[must_use]
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            name: default_name(),
            capabilities: CapabilitySet::default(),
            read_interval: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the enabled capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Enables one more capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    /// Sets the scheduled read interval.
    #[must_use]
    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = Some(interval);
        self
    }
}

/// Read intervals are written as fractional seconds.
mod interval_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::ConfigError;

    #[allow(clippy::ref_option)] // signature required by serde's `with`
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(interval) => serializer.serialize_some(&interval.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let Some(secs) = Option::<f64>::deserialize(deserializer)? else {
            return Ok(None);
        };

        if !secs.is_finite() || secs <= 0.0 {
            return Err(D::Error::custom(ConfigError::InvalidInterval(secs)));
        }

        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| D::Error::custom(ConfigError::InvalidInterval(secs)))
    }
}

/// Address-keyed store of device configurations.
///
/// Iteration follows the order in which addresses were first added. Adding
/// a configuration for an address that is already present replaces the
/// earlier entry in place.
///
/// # Examples
///
/// ```
/// use tagfleet::ConfigStore;
///
/// let store = ConfigStore::from_json(r#"[
///     {"address": "12:34:56:78:12:34", "name": "First"},
///     {"address": "AA:BB:CC:DD:EE:FF"},
///     {"address": "12:34:56:78:12:34", "name": "Second"}
/// ]"#).unwrap();
///
/// assert_eq!(store.len(), 2);
/// let names: Vec<_> = store.iter().map(|c| c.name.as_str()).collect();
/// assert_eq!(names, ["Second", "SensorTag"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    order: Vec<DeviceAddress>,
    devices: HashMap<DeviceAddress, Arc<DeviceConfig>>,
}

impl ConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from an ordered list of entries.
    pub fn from_entries(entries: impl IntoIterator<Item = DeviceConfig>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.upsert(entry);
        }
        store
    }

    /// Parses a JSON array of device entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document is malformed, an
    /// address is invalid or a sensor name is unknown.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let entries: Vec<DeviceConfig> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    /// Inserts or replaces the configuration for its address.
    ///
    /// Returns the replaced configuration, if any.
    pub fn upsert(&mut self, config: DeviceConfig) -> Option<Arc<DeviceConfig>> {
        let address = config.address.clone();
        let previous = self.devices.insert(address.clone(), Arc::new(config));
        if previous.is_none() {
            self.order.push(address);
        }
        previous
    }

    /// Returns the configuration for `address`.
    #[must_use]
    pub fn get(&self, address: &DeviceAddress) -> Option<Arc<DeviceConfig>> {
        self.devices.get(address).cloned()
    }

    /// Iterates over configurations in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceConfig>> {
        self.order.iter().filter_map(|address| self.devices.get(address))
    }

    /// Returns the configured addresses in first-seen order.
    #[must_use]
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.order.clone()
    }

    /// Returns the number of configured devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no device is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Tuning of the connection manager.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tagfleet::ManagerSettings;
///
/// let settings = ManagerSettings::default()
///     .with_backoff(Duration::from_secs(2))
///     .with_read_admission_limit(3);
///
/// assert_eq!(settings.notification_timeout, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Fixed delay between failed connection attempts.
    pub backoff: Duration,
    /// Maximum concurrently in-flight reads per device; further reads are dropped.
    pub read_admission_limit: usize,
    /// Timeout of one notification wait. The link is held for this long.
    pub notification_timeout: Duration,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl ManagerSettings {
    /// Sets the delay between failed connection attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the read admission limit.
    #[must_use]
    pub fn with_read_admission_limit(mut self, limit: usize) -> Self {
        self.read_admission_limit = limit;
        self
    }

    /// Sets the notification wait timeout.
    #[must_use]
    pub fn with_notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }

    /// Sets the event buffer per subscriber.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            read_admission_limit: 5,
            notification_timeout: Duration::from_secs(1),
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
