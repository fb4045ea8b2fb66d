// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `tagfleet` - Connection management for fleets of BLE sensor tags.
//!
//! This library keeps a set of sensor tags connected, reads their sensors
//! on demand and forwards their key presses. Everything it observes is
//! published as a stream of [`event::DeviceEvent`]s.
//!
//! # Supported Features
//!
//! - **Connection lifecycle**: connect, enable sensors, retry forever with a
//!   fixed backoff, reconnect on link failure
//! - **Sensor reads**: IR temperature, accelerometer, humidity, magnetometer,
//!   barometer and gyroscope, labelled by field name
//! - **Key presses**: left, right and combined buttons, press and release
//! - **Load shedding**: bounded number of reads in flight per device
//!
//! The radio itself sits behind the [`transport::Transport`] trait. A
//! scripted [`transport::mock::MockTransport`] is included for tests and
//! demos.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use tagfleet::{ConfigStore, ConnectionManager};
//! use tagfleet::transport::mock::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> tagfleet::Result<()> {
//!     let store = ConfigStore::from_json(r#"[
//!         {
//!             "address": "12:34:56:78:12:34",
//!             "name": "Kitchen",
//!             "sensors": {"humidity": true, "keypress": true},
//!             "read_interval": 30.0
//!         }
//!     ]"#)?;
//!
//!     let manager = ConnectionManager::new(MockTransport::new(), store);
//!     let mut events = manager.subscribe();
//!
//!     // Connects every tag and schedules the periodic reads
//!     manager.start();
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap_or_default());
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Triggering reads
//!
//! ```no_run
//! use tagfleet::{ConnectionManager, ConfigStore, DeviceAddress, ReadOutcome};
//! use tagfleet::transport::mock::MockTransport;
//!
//! # async fn example() -> tagfleet::Result<()> {
//! let manager = ConnectionManager::new(MockTransport::new(), ConfigStore::new());
//! let address = DeviceAddress::new("12:34:56:78:12:34")?;
//!
//! match manager.read_once(&address).await? {
//!     ReadOutcome::Emitted => println!("reading published"),
//!     ReadOutcome::Dropped => println!("device busy"),
//!     ReadOutcome::NotConnected | ReadOutcome::Reconnecting => println!("device offline"),
//! }
//!
//! // Or read every connected tag at once
//! manager.trigger_read_all();
//! # Ok(())
//! # }
//! ```

mod capabilities;
pub mod error;
pub mod event;
pub mod manager;
pub mod transport;

pub use capabilities::{Capability, CapabilitySet, FieldMap};
pub use error::{ConfigError, Error, Result, TransportError};
pub use event::{ConnectionStatus, DeviceAddress, DeviceEvent};
pub use manager::{ConfigStore, ConnectionManager, DeviceConfig, ManagerSettings, ReadOutcome};
