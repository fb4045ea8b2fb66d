// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection manager for a fleet of sensor tags.
//!
//! This module keeps one live link per configured tag, reads sensors on
//! demand and forwards key presses, publishing everything as
//! [`DeviceEvent`](crate::event::DeviceEvent)s.
//!
//! # Overview
//!
//! The [`ConnectionManager`] is the central component. It provides:
//!
//! - **Unbounded retry**: unreachable devices are retried with a fixed backoff
//!   until the manager stops
//! - **Single connection per device**: concurrent reconnect requests collapse
//!   into one cycle
//! - **Read admission**: at most [`ManagerSettings::read_admission_limit`]
//!   reads in flight per device, further reads are dropped
//! - **Serialized link access**: reads and notification waits never overlap
//!   on the same device
//!
//! # Examples
//!
//! ## Reading on demand
//!
//! ```no_run
//! use tagfleet::{Capability, ConnectionManager, DeviceAddress, DeviceConfig, ConfigStore};
//! use tagfleet::event::DeviceEvent;
//! use tagfleet::transport::mock::MockTransport;
//!
//! # async fn example() -> tagfleet::Result<()> {
//! let address = DeviceAddress::new("12:34:56:78:12:34")?;
//! let store = ConfigStore::from_entries([
//!     DeviceConfig::new(address.clone()).with_capability(Capability::Humidity),
//! ]);
//!
//! let manager = ConnectionManager::new(MockTransport::new(), store);
//! let mut events = manager.subscribe();
//! manager.connect_all();
//!
//! while let Ok(event) = events.recv().await {
//!     if let DeviceEvent::Status { status, .. } = &event {
//!         if status.is_connected() {
//!             manager.read_once(&address).await?;
//!         }
//!     }
//!     if let DeviceEvent::Sensors(reading) = event {
//!         println!("{:?}", reading.get(Capability::Humidity));
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod connection;
mod device_config;
mod device_manager;
mod listener;
mod reader;

pub use device_config::{ConfigStore, DEFAULT_DEVICE_NAME, DeviceConfig, ManagerSettings};
pub use device_manager::ConnectionManager;
pub use reader::ReadOutcome;
