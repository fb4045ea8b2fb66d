// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read coordination: admission, serialized link access and publishing.

use std::time::Duration;

use chrono::Utc;

use crate::capabilities::{Capability, CapabilitySet, FieldMap};
use crate::error::{Result, TransportError};
use crate::event::{DeviceAddress, DeviceEvent, SensorReading};
use crate::transport::{DeviceHandle, Transport};

use super::device_manager::ConnectionManager;

/// What happened to one read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A `Sensors` event was published.
    Emitted,
    /// The device already had the maximum number of reads in flight.
    Dropped,
    /// The device has no live connection.
    NotConnected,
    /// The link failed during the read and a reconnect was started.
    Reconnecting,
}

impl<T: Transport> ConnectionManager<T> {
    /// Reads every enabled sensor of a device once and publishes the result.
    ///
    /// Reads beyond [`read_admission_limit`] in flight for the same device
    /// are dropped rather than queued. A transport failure abandons the
    /// read and reconnects the device, reading again once it is back.
    ///
    /// [`read_admission_limit`]: super::ManagerSettings::read_admission_limit
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldCount`](crate::Error::FieldCount) if the device
    /// returned a different number of values than a capability declares.
    pub async fn read_once(&self, address: &DeviceAddress) -> Result<ReadOutcome> {
        let Some(conn) = self.connection(address) else {
            tracing::debug!(%address, "Read skipped, device not connected");
            return Ok(ReadOutcome::NotConnected);
        };

        let Some(_slot) = conn.try_admit(self.inner.settings.read_admission_limit) else {
            tracing::debug!(
                %address,
                limit = self.inner.settings.read_admission_limit,
                "Read dropped, too many reads in flight"
            );
            return Ok(ReadOutcome::Dropped);
        };

        let raw = {
            let mut link = conn.link().await;
            if conn.is_closed() {
                return Ok(ReadOutcome::NotConnected);
            }

            match read_capabilities(&mut *link, conn.config.capabilities).await {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::warn!(%address, name = %conn.config.name, %error, "Read failed");
                    self.reconnect_failed(&conn, true);
                    return Ok(ReadOutcome::Reconnecting);
                }
            }
        };

        let readings = raw
            .into_iter()
            .map(|(capability, values)| {
                capability.label(&values).map(|fields| (capability, fields))
            })
            .collect::<std::result::Result<Vec<(Capability, FieldMap)>, _>>()
            .inspect_err(|error| tracing::error!(%address, %error, "Schema mismatch"))?;

        self.inner.events.publish(DeviceEvent::Sensors(SensorReading {
            name: conn.config.name.clone(),
            address: address.clone(),
            readings,
            timestamp: Utc::now(),
        }));

        Ok(ReadOutcome::Emitted)
    }

    /// Starts one read per connected device, each on its own task.
    ///
    /// Returns the number of reads started.
    pub fn trigger_read_all(&self) -> usize {
        let addresses = self.connected_addresses();
        for address in &addresses {
            self.spawn_read(address.clone());
        }
        addresses.len()
    }

    fn spawn_read(&self, address: DeviceAddress) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(error) = manager.read_once(&address).await {
                tracing::error!(%address, %error, "Scheduled read failed");
            }
        });
    }

    /// Starts periodic reads of a device unless a poller already runs for it.
    ///
    /// Each tick starts an independent read, so a slow device accumulates
    /// reads in flight up to the admission limit.
    pub(super) fn spawn_poller(&self, address: DeviceAddress, interval: Duration) {
        if !self.inner.registry.lock().polling.insert(address.clone()) {
            return;
        }

        let manager = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tracing::debug!(%address, ?interval, "Poller started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            while !manager.is_shut_down() {
                tokio::select! {
                    _ = ticker.tick() => manager.spawn_read(address.clone()),
                    _ = shutdown.changed() => break,
                }
            }

            manager.inner.registry.lock().polling.remove(&address);
            tracing::debug!(%address, "Poller stopped");
        });
    }
}

/// Reads every readable capability in registry order.
async fn read_capabilities<H: DeviceHandle>(
    link: &mut H,
    capabilities: CapabilitySet,
) -> std::result::Result<Vec<(Capability, Vec<f64>)>, TransportError> {
    let mut raw = Vec::new();
    for capability in capabilities.readable() {
        raw.push((capability, link.read(capability).await?));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::manager::{ConfigStore, DeviceConfig, ManagerSettings};
    use crate::transport::mock::MockTransport;

    fn addr() -> DeviceAddress {
        DeviceAddress::new("12:34:56:78:12:34").unwrap()
    }

    async fn connected(config: DeviceConfig) -> ConnectionManager<MockTransport> {
        let settings = ManagerSettings::default().with_backoff(Duration::from_millis(10));
        let manager = ConnectionManager::with_settings(
            MockTransport::new(),
            ConfigStore::from_entries([config]),
            settings,
        );
        manager.connect_all();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !manager.is_connected(&addr()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        manager
    }

    #[tokio::test]
    async fn read_of_unknown_device_is_not_connected() {
        let manager = ConnectionManager::new(MockTransport::new(), ConfigStore::new());
        let outcome = manager.read_once(&addr()).await.unwrap();
        assert_eq!(outcome, ReadOutcome::NotConnected);
    }

    #[tokio::test]
    async fn read_publishes_labelled_values() {
        let config = DeviceConfig::new(addr())
            .with_name("Kitchen")
            .with_capability(Capability::Humidity);
        let manager = connected(config).await;
        let mut events = manager.subscribe();

        assert_eq!(manager.read_once(&addr()).await.unwrap(), ReadOutcome::Emitted);

        let DeviceEvent::Sensors(reading) = events.recv().await.unwrap() else {
            panic!("expected sensors event");
        };
        assert_eq!(reading.name, "Kitchen");
        assert_eq!(reading.address, addr());
        assert_eq!(reading.readings.len(), 2);
        assert_eq!(
            reading.get(Capability::IrTemperature).unwrap().get("ambient_temp_degC"),
            Some(1.0)
        );
        assert_eq!(
            reading.get(Capability::Humidity).unwrap().get("relative_humidity"),
            Some(2.0)
        );
        assert_eq!(manager.in_flight_reads(&addr()), Some(0));
    }

    #[tokio::test]
    async fn keypress_is_never_read() {
        let config = DeviceConfig::new(addr()).with_capability(Capability::Keypress);
        let manager = connected(config).await;

        manager.read_once(&addr()).await.unwrap();
        assert_eq!(manager.transport().read_count(&addr()), 1);
    }

    #[tokio::test]
    async fn value_count_mismatch_is_an_error() {
        let manager = connected(DeviceConfig::new(addr())).await;
        manager
            .transport()
            .set_values(&addr(), Capability::IrTemperature, vec![21.5]);

        let result = manager.read_once(&addr()).await;

        assert!(matches!(
            result,
            Err(Error::FieldCount {
                capability: Capability::IrTemperature,
                expected: 2,
                actual: 1,
            })
        ));
        assert!(manager.is_connected(&addr()));
        assert_eq!(manager.in_flight_reads(&addr()), Some(0));
    }

    #[tokio::test]
    async fn zero_admission_limit_drops_every_read() {
        let settings = ManagerSettings::default().with_read_admission_limit(0);
        let manager = ConnectionManager::with_settings(
            MockTransport::new(),
            ConfigStore::from_entries([DeviceConfig::new(addr())]),
            settings,
        );
        manager.connect_all();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !manager.is_connected(&addr()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(manager.read_once(&addr()).await.unwrap(), ReadOutcome::Dropped);
        assert_eq!(manager.transport().read_count(&addr()), 0);
    }

    #[tokio::test]
    async fn trigger_read_all_counts_connected_devices() {
        let manager = connected(DeviceConfig::new(addr())).await;
        let mut events = manager.subscribe();

        assert_eq!(manager.trigger_read_all(), 1);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_sensors());
    }
}
